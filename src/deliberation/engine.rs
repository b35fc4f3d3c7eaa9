//! The deliberation orchestrator.
//!
//! One engine instance serves many requests; each request runs a round
//! loop:
//!
//! 1. build per-participant prompts (graph context and instructions in
//!    round 1, debate replay and tool evidence afterwards)
//! 2. fan out all adapter invocations concurrently under the round
//!    deadline; failures are isolated to their participant
//! 3. parse votes and tool requests from every successful response and
//!    execute the tools before the next round starts
//! 4. run convergence detection and the model-controlled early stop
//!
//! Every downstream failure is carried as data. The result reports
//! `failed` only when no participant produced a single response.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::adapters::{AdapterFactory, ModelRegistry, PromptLengthCheck};
use crate::config::EngineConfig;
use crate::consensus::{
    ConsensusClass, ConvergenceDetector, ConvergenceInfo, ConvergenceStatus, RoundVote,
    VoteAggregator,
};
use crate::error::{AdapterErrorKind, Error, Result};
use crate::graph::GraphIntegration;
use crate::markers;
use crate::similarity::SimilarityBackend;
use crate::tools::{ToolExecutor, ToolRequest};

use super::prompts;
use super::transcript::TranscriptWriter;
use super::types::{
    DeliberateRequest, DeliberationResult, DeliberationStatus, Mode, Participant, RoundResponse,
};

/// Orchestrates multi-round deliberations.
pub struct DeliberationEngine {
    factory: Arc<AdapterFactory>,
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn SimilarityBackend>,
    graph: Arc<GraphIntegration>,
    transcripts: TranscriptWriter,
    config: EngineConfig,
    request_deadline: Option<Duration>,
}

impl DeliberationEngine {
    pub fn new(
        factory: Arc<AdapterFactory>,
        registry: Arc<ModelRegistry>,
        backend: Arc<dyn SimilarityBackend>,
        graph: Arc<GraphIntegration>,
        config: EngineConfig,
    ) -> Self {
        Self {
            factory,
            registry,
            backend,
            graph,
            transcripts: TranscriptWriter::in_temp(),
            config,
            request_deadline: None,
        }
    }

    /// Redirect transcript artifacts (tests, hosts with their own dirs).
    pub fn with_transcript_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.transcripts = TranscriptWriter::new(dir);
        self
    }

    /// Optional whole-request deadline, checked at round boundaries.
    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = Some(deadline);
        self
    }

    /// Run one deliberation to completion.
    #[instrument(skip(self, request), fields(mode = ?request.mode, participants = request.participants.len()))]
    pub async fn deliberate(&self, request: DeliberateRequest) -> Result<DeliberationResult> {
        self.validate(&request)?;

        let started = Instant::now();
        let transcript_ref = self.transcripts.allocate_ref();
        let round_deadline = Duration::from_secs(self.config.defaults.timeout_per_round);
        let total_rounds = match request.mode {
            Mode::Quick => 1,
            Mode::Conference => request.rounds,
        };

        let graph_context = self.graph.get_context_for_deliberation(&request.question);
        let tool_executor = Arc::new(ToolExecutor::new(
            resolve_working_dir(request.working_directory.as_deref()),
            self.config.tools.clone(),
        ));
        let aggregator = VoteAggregator::new(Arc::clone(&self.backend));
        let mut detector = ConvergenceDetector::new(
            Arc::clone(&self.backend),
            self.config.convergence_detection.clone(),
        );

        let mut debate: Vec<RoundResponse> = Vec::new();
        let mut all_votes: Vec<RoundVote> = Vec::new();
        let mut tool_records = Vec::new();
        let mut last_convergence: Option<ConvergenceInfo> = None;
        let mut previous_round: Vec<(String, String)> = Vec::new();
        let mut rounds_completed = 0;
        let mut failed = false;

        for round_num in 1..=total_rounds {
            if let Some(deadline) = self.request_deadline {
                if started.elapsed() >= deadline {
                    warn!(round = round_num, "request deadline reached at round boundary");
                    break;
                }
            }

            // Tool results from the previous round, shared by everyone.
            let tool_preamble = {
                let previous: Vec<_> = tool_records
                    .iter()
                    .filter(|record: &&crate::tools::ToolExecutionRecord| {
                        record.round_num + 1 == round_num
                    })
                    .cloned()
                    .collect();
                let text =
                    prompts::tool_results_preamble(&previous, self.config.tools.result_cap_bytes);
                (!text.is_empty()).then_some(text)
            };

            let responses = self
                .run_round(
                    &request,
                    round_num,
                    &debate,
                    graph_context.as_deref(),
                    tool_preamble.as_deref(),
                    round_deadline,
                )
                .await;
            rounds_completed = round_num;

            if responses.is_empty() {
                warn!(round = round_num, "no participant produced a response");
                failed = true;
                break;
            }

            // Parse markers out of every successful response.
            let mut round_tool_requests: Vec<(String, ToolRequest)> = Vec::new();
            let mut stop_votes = 0usize;
            for response in &responses {
                if let Some(vote) = markers::parse_votes(&response.response_text) {
                    if !vote.continue_debate {
                        stop_votes += 1;
                    }
                    all_votes.push(RoundVote::new(
                        round_num,
                        response.participant_id.clone(),
                        vote,
                    ));
                }
                for tool_request in markers::parse_tool_requests(&response.response_text) {
                    round_tool_requests.push((response.participant_id.clone(), tool_request));
                }
            }

            // Tool executions settle before the round ends (their results
            // feed the next round's preamble).
            if !round_tool_requests.is_empty() {
                let records = tool_executor
                    .execute_round(round_tool_requests, round_num)
                    .await;
                tool_records.extend(records);
            }

            let current_round: Vec<(String, String)> = responses
                .iter()
                .map(|r| (r.participant_id.clone(), r.response_text.clone()))
                .collect();
            debate.extend(responses.iter().cloned());

            let voting = (!all_votes.is_empty()).then(|| aggregator.aggregate(&all_votes));

            if request.mode == Mode::Conference {
                if let Some(info) = detector.check_round(
                    round_num,
                    &previous_round,
                    &current_round,
                    voting.as_ref(),
                ) {
                    last_convergence = Some(info);
                }
            }
            previous_round = current_round;

            // Model-controlled early stop.
            if self.config.early_stopping.enabled {
                let fraction = stop_votes as f64 / responses.len() as f64;
                let min_rounds_ok = !self.config.early_stopping.respect_min_rounds
                    || round_num >= self.config.defaults.rounds;
                if fraction >= self.config.early_stopping.threshold && min_rounds_ok {
                    info!(
                        round = round_num,
                        fraction, "participants voted to stop the debate"
                    );
                    break;
                }
            }

            if last_convergence
                .as_ref()
                .map(|info| info.detected)
                .unwrap_or(false)
            {
                info!(round = round_num, "convergence detected");
                break;
            }
        }

        // Canonical ordering: round asc, participant lexicographic.
        debate.sort_by(|a, b| {
            (a.round_num, a.participant_id.as_str()).cmp(&(b.round_num, b.participant_id.as_str()))
        });
        tool_records.sort_by(|a, b| {
            (
                a.round_num,
                a.requesting_participant_id.as_str(),
                a.tool_name.as_str(),
            )
                .cmp(&(
                    b.round_num,
                    b.requesting_participant_id.as_str(),
                    b.tool_name.as_str(),
                ))
        });

        let voting_result = (!all_votes.is_empty()).then(|| aggregator.aggregate(&all_votes));
        let convergence_info = match request.mode {
            Mode::Quick => None,
            Mode::Conference => {
                finalize_convergence(last_convergence, voting_result.as_ref(), rounds_completed)
            }
        };

        let result = DeliberationResult {
            question: request.question.clone(),
            participants: request.participants.clone(),
            full_debate: debate,
            voting_result,
            convergence_info,
            tool_executions: tool_records,
            rounds_completed,
            status: if failed {
                DeliberationStatus::Failed
            } else {
                DeliberationStatus::Complete
            },
            summary: None,
            transcript_ref,
            full_debate_truncated: false,
            total_rounds: None,
        };

        // Full history goes to the artifact regardless of transport
        // truncation or persistence failures.
        if let Err(error) = self.transcripts.write(&result.transcript_ref, &result) {
            warn!(%error, "failed to write transcript artifact");
        }
        let decision_id = self.graph.store_deliberation(&result);
        debug!(
            rounds = result.rounds_completed,
            status = ?result.status,
            decision = ?decision_id,
            wall_ms = started.elapsed().as_millis() as u64,
            "deliberation finished"
        );

        Ok(result)
    }

    /// Truncation rule applied when handing the result to the transport.
    pub fn for_transport(&self, result: DeliberationResult) -> DeliberationResult {
        result.for_transport(self.config.transport.max_rounds_in_response)
    }

    fn validate(&self, request: &DeliberateRequest) -> Result<()> {
        request.validate(self.config.defaults.max_rounds)?;
        for participant in &request.participants {
            self.factory.get(&participant.adapter_name)?;
            if !self
                .registry
                .is_allowed(&participant.adapter_name, &participant.model_id)
            {
                return Err(Error::validation(format!(
                    "model '{}' is not allowlisted for adapter '{}'",
                    participant.model_id, participant.adapter_name
                )));
            }
        }
        Ok(())
    }

    /// Fan out one round of adapter invocations; returns the successful
    /// responses sorted by participant identity.
    async fn run_round(
        &self,
        request: &DeliberateRequest,
        round_num: u32,
        debate: &[RoundResponse],
        graph_context: Option<&str>,
        tool_preamble: Option<&str>,
        round_deadline: Duration,
    ) -> Vec<RoundResponse> {
        let tasks: Vec<_> = request
            .participants
            .iter()
            .map(|participant| {
                let prompt = if round_num == 1 {
                    prompts::round_one_prompt(
                        &request.question,
                        request.context.as_deref(),
                        graph_context,
                        participant.stance,
                    )
                } else {
                    prompts::later_round_prompt(
                        &request.question,
                        round_num,
                        debate,
                        tool_preamble,
                        participant.stance,
                    )
                };
                self.invoke_participant(participant, prompt, round_deadline)
            })
            .collect();

        let mut responses: Vec<RoundResponse> = join_all(tasks)
            .await
            .into_iter()
            .enumerate()
            .filter_map(|(index, outcome)| {
                let participant = &request.participants[index];
                match outcome {
                    Ok(text) => Some(RoundResponse {
                        round_num,
                        participant_id: participant.identity(),
                        response_text: text,
                        stance: participant.stance,
                        timestamp: Utc::now(),
                    }),
                    Err(error) => {
                        warn!(
                            participant = %participant.identity(),
                            round = round_num,
                            %error,
                            "adapter invocation failed; participant absent this round"
                        );
                        None
                    }
                }
            })
            .collect();

        responses.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        responses
    }

    async fn invoke_participant(
        &self,
        participant: &Participant,
        prompt: String,
        round_deadline: Duration,
    ) -> Result<String> {
        let adapter = self.factory.get(&participant.adapter_name)?;
        if let PromptLengthCheck::TooLong { limit } = adapter.validate_prompt_length(&prompt) {
            return Err(Error::adapter(
                &participant.adapter_name,
                AdapterErrorKind::InvalidModel,
                format!("prompt exceeds adapter limit of {} characters", limit),
            ));
        }
        adapter
            .invoke(&participant.model_id, &prompt, round_deadline)
            .await
    }
}

/// Merge the last semantic check with the final voting outcome. Voting
/// precedence: a decisive tally overrides the semantic classification
/// and forces detection, even when no semantic check ever ran.
fn finalize_convergence(
    last: Option<ConvergenceInfo>,
    voting: Option<&crate::consensus::VotingResult>,
    rounds_completed: u32,
) -> Option<ConvergenceInfo> {
    let vote_class = voting
        .map(|v| v.consensus)
        .filter(|class| *class != ConsensusClass::NoVotes);

    let override_status = match vote_class {
        Some(ConsensusClass::UnanimousConsensus) => Some(ConvergenceStatus::UnanimousConsensus),
        Some(ConsensusClass::MajorityDecision) => Some(ConvergenceStatus::MajorityDecision),
        Some(ConsensusClass::Tie) => Some(ConvergenceStatus::Tie),
        _ => None,
    };
    let decisive = matches!(
        vote_class,
        Some(ConsensusClass::UnanimousConsensus) | Some(ConsensusClass::MajorityDecision)
    );

    match (last, override_status) {
        (Some(mut info), Some(status)) => {
            info.status = status;
            if decisive {
                info.detected = true;
                info.detection_round.get_or_insert(rounds_completed);
            }
            Some(info)
        }
        (Some(info), None) => Some(info),
        (None, Some(status)) => Some(ConvergenceInfo {
            detected: decisive,
            detection_round: decisive.then_some(rounds_completed),
            final_similarity: 0.0,
            status,
            per_participant_similarity: Default::default(),
        }),
        (None, None) => None,
    }
}

fn resolve_working_dir(requested: Option<&str>) -> std::path::PathBuf {
    match requested {
        Some(dir) => std::path::PathBuf::from(shellexpand::tilde(dir).into_owned()),
        None => std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir()),
    }
}
