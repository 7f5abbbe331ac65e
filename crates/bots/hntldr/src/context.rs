use std::sync::Arc;

use hntldr_db::Database;

use crate::hn::{CandidateSource, ContentFetcher};
use crate::notifier::OperatorNotifier;
use crate::publisher::Publisher;
use crate::synth::Synthesizer;

/// Shared handles for the poll cycle and the update worker.
///
/// Built once at startup and cloned into each task; nothing in the bot
/// keeps process-wide mutable state.
#[derive(Clone)]
pub struct BotContext {
    pub db: Arc<Database>,
    pub candidates: Arc<dyn CandidateSource>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub publisher: Arc<dyn Publisher>,
    pub notifier: Arc<dyn OperatorNotifier>,
}
