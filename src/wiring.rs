//! Builds the full component graph from a [`Config`], the way the teacher's
//! gateway binary builds its `Gateway` from a single config value. Everything
//! that isn't implemented in this workspace (cloud collectors, embedding and
//! completion models, action handlers, notification transports) is wired to
//! the no-op adapters in `incident_common::adapters` unless the caller
//! supplies a real one.

use std::collections::HashMap;
use std::sync::Arc;

use incident_common::adapters::{NoopCompleter, NoopEmbedder, TracingNotifier};
use incident_common::ports::{ActionHandler, Collector, Completer, Embedder, NotificationTransport};
use incident_common::{ActionId, Config, Result};
use incident_correlator::DefaultCorrelator;
use incident_detect::DefaultDetectAgent;
use incident_executor::DefaultSopExecutor;
use incident_knowledge::SledKnowledgeStore;
use incident_orchestrator::{DefaultFeedbackLearner, DefaultOrchestrator};
use incident_rca::DefaultRcaInferencer;
use incident_rules::DefaultRuleMatcher;
use incident_safety::{DefaultSafetyGate, SopDefinition};
use incident_search::DefaultSearchService;

/// Optional external collaborators the binary can supply; anything left
/// `None` falls back to a no-op adapter (§6: the core only depends on the
/// trait, never on a concrete backend).
#[derive(Default)]
pub struct ExternalPorts {
    pub collectors: Vec<Arc<dyn Collector>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub completer: Option<Arc<dyn Completer>>,
    pub action_handlers: HashMap<ActionId, Arc<dyn ActionHandler>>,
    pub notifier: Option<Arc<dyn NotificationTransport>>,
}

/// The fully wired pipeline. Holds the orchestrator behind its trait for
/// `handle_incident`/`health_check`/`shutdown`, plus the concrete detect
/// agent and safety gate so a signal handler can reload their snapshots
/// in place without disturbing any other component's state (§4.10).
pub struct PipelineRuntime {
    pub config: Arc<Config>,
    pub orchestrator: Arc<DefaultOrchestrator>,
    pub detect: Arc<DefaultDetectAgent>,
    pub safety: Arc<DefaultSafetyGate>,
    pub knowledge: Arc<SledKnowledgeStore>,
}

impl PipelineRuntime {
    /// Constructs every component from `config`, loading the initial rule
    /// set and SOP catalog from the paths it names.
    pub async fn build(config: Arc<Config>, ports: ExternalPorts) -> Result<Self> {
        let rules = crate::loaders::load_rules(&config.orchestrator.rules_path).await?;
        let sop_catalog = crate::loaders::load_sop_catalog(&config.orchestrator.sops_path).await?;

        let embedder: Arc<dyn Embedder> = ports
            .embedder
            .unwrap_or_else(|| Arc::new(NoopEmbedder::new(config.knowledge.embedding_dim)));
        let completer: Arc<dyn Completer> = ports.completer.unwrap_or_else(|| Arc::new(NoopCompleter));
        let notifier: Arc<dyn NotificationTransport> = ports.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));

        let action_handlers = ports.action_handlers;

        let correlator = Arc::new(DefaultCorrelator::new(config.clone(), ports.collectors));
        let rule_matcher = Arc::new(DefaultRuleMatcher::new());
        let detect = Arc::new(DefaultDetectAgent::new(
            config.clone(),
            correlator.clone(),
            rule_matcher.clone(),
            rules,
        ));

        let knowledge = Arc::new(SledKnowledgeStore::open(config.clone(), embedder.clone()).await?);
        let search = Arc::new(DefaultSearchService::new(
            config.clone(),
            knowledge.clone(),
            embedder.clone(),
            Some(completer.clone()),
        ));
        let rca = Arc::new(DefaultRcaInferencer::new(
            config.clone(),
            knowledge.clone(),
            search.clone(),
            completer.clone(),
        ));
        let safety = Arc::new(DefaultSafetyGate::new(config.clone(), sop_catalog));
        let executor = Arc::new(DefaultSopExecutor::new(config.clone(), action_handlers));
        let feedback = Arc::new(DefaultFeedbackLearner::new(knowledge.clone()));

        let orchestrator = Arc::new(DefaultOrchestrator::new(
            config.clone(),
            detect.clone(),
            rca.clone(),
            safety.clone(),
            executor.clone(),
            Some(notifier.clone()),
            feedback.clone(),
        ));

        Ok(PipelineRuntime {
            config,
            orchestrator,
            detect,
            safety,
            knowledge,
        })
    }

    /// Re-reads the rule set and SOP catalog from their configured paths and
    /// swaps them into the live detect agent and safety gate. Cooldowns,
    /// approval tokens and the cached detect result all survive (§4.10).
    pub async fn reload(&self) -> Result<()> {
        let rules = crate::loaders::load_rules(&self.config.orchestrator.rules_path).await?;
        let sop_catalog = crate::loaders::load_sop_catalog(&self.config.orchestrator.sops_path).await?;
        self.detect.reload_rules(rules);
        self.safety.reload_catalog(sop_catalog);
        Ok(())
    }
}

/// Re-exported for binaries that want to hand-author a catalog instead of
/// loading one from disk.
pub type SopCatalogEntry = SopDefinition;
