//! Step emitter
//!
//! A plain blocking iterator over the milestones of one crew run. Every call
//! to `next` may block: on pacing, and on the crew run itself at the end. It
//! never tries to cooperate with an async scheduler; the bridge takes care of
//! that by pulling it from a worker thread.

use std::iter::FusedIterator;

use crate::config::StreamConfig;
use crate::crew::{default_roles, default_tasks, Collaborators, Crew, Role, SequencingPolicy};
use crate::error::PipelineExecutionError;
use crate::protocol;

/// One streamed milestone. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    seq: u64,
    text: String,
}

impl ProgressRecord {
    pub fn new(seq: u64, text: impl Into<String>) -> Self {
        Self {
            seq,
            text: text.into(),
        }
    }

    /// Position in emission order, starting at 0
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// What a pull yields
pub type RecordResult = Result<ProgressRecord, PipelineExecutionError>;

#[derive(Debug)]
enum Stage {
    Start,
    ConfigureAgents,
    ConfigureTasks { roles: Vec<Role> },
    Working { crew: Crew, completed: usize },
    Running { crew: Crew },
    Done,
}

/// Lazy, finite, single-use sequence of progress records for one query
pub struct StepEmitter {
    query: String,
    collaborators: Collaborators,
    settings: StreamConfig,
    stage: Stage,
    next_seq: u64,
    pause_before_next: bool,
}

impl StepEmitter {
    pub fn new(query: impl Into<String>, collaborators: Collaborators, settings: StreamConfig) -> Self {
        Self {
            query: query.into(),
            collaborators,
            settings,
            stage: Stage::Start,
            next_seq: 0,
            pause_before_next: false,
        }
    }

    fn record(&mut self, text: impl Into<String>) -> ProgressRecord {
        let record = ProgressRecord::new(self.next_seq, text);
        self.next_seq += 1;
        record
    }

    fn pace(&mut self) {
        if std::mem::take(&mut self.pause_before_next) {
            let delay = self.settings.step_delay();
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }

    fn advance(&mut self) -> Option<RecordResult> {
        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Start => {
                self.stage = Stage::ConfigureAgents;
                let text = protocol::starting_analysis(&self.query);
                Some(Ok(self.record(text)))
            }
            Stage::ConfigureAgents => {
                self.stage = Stage::ConfigureTasks {
                    roles: default_roles(),
                };
                Some(Ok(self.record(protocol::AGENTS_CONFIGURED)))
            }
            Stage::ConfigureTasks { roles } => {
                let tasks = default_tasks(&self.query);
                let crew = match Crew::new(roles, tasks, SequencingPolicy::Sequential) {
                    Ok(crew) => crew,
                    Err(e) => return Some(Err(e)),
                };
                self.stage = Stage::Working { crew, completed: 0 };
                Some(Ok(self.record(protocol::TASKS_DEFINED)))
            }
            Stage::Working { crew, completed } if completed < self.settings.working_steps => {
                let step = completed + 1;
                self.stage = Stage::Working {
                    crew,
                    completed: step,
                };
                let text = protocol::working_step(step, self.settings.working_steps);
                Some(Ok(self.record(text)))
            }
            Stage::Working { crew, .. } => {
                self.stage = Stage::Running { crew };
                self.advance()
            }
            Stage::Running { crew } => {
                tracing::debug!("Running crew with {} tasks", crew.tasks.len());
                match self.collaborators.run(&crew) {
                    Ok(result) => {
                        let text = protocol::final_result(&result);
                        Some(Ok(self.record(text)))
                    }
                    Err(e) => Some(Err(e)),
                }
            }
            Stage::Done => None,
        }
    }
}

impl Iterator for StepEmitter {
    type Item = RecordResult;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.stage, Stage::Done) {
            return None;
        }

        self.pace();
        let item = self.advance();
        // every record except the last is followed by a pause
        self.pause_before_next = !matches!(self.stage, Stage::Done);
        item
    }
}

impl FusedIterator for StepEmitter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crew::{DocumentLookup, PipelineRunner};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    struct EchoLookup;

    impl DocumentLookup for EchoLookup {
        fn lookup(&self, question: &str) -> Result<String, PipelineExecutionError> {
            Ok(format!("passages for {question}"))
        }
    }

    #[derive(Default)]
    struct RecordingRunner {
        calls: AtomicUsize,
        crews: Mutex<Vec<Crew>>,
        fail: bool,
    }

    impl PipelineRunner for RecordingRunner {
        fn run_pipeline(
            &self,
            crew: &Crew,
            _lookup: &dyn DocumentLookup,
        ) -> Result<String, PipelineExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.crews.lock().expect("lock").push(crew.clone());
            if self.fail {
                Err(PipelineExecutionError::run_pipeline("rate limited"))
            } else {
                Ok("Revenue grew.".to_string())
            }
        }
    }

    fn unpaced(working_steps: usize) -> StreamConfig {
        StreamConfig {
            step_delay_ms: 0,
            working_steps,
            max_run_secs: None,
        }
    }

    fn emitter(query: &str, runner: Arc<RecordingRunner>, settings: StreamConfig) -> StepEmitter {
        StepEmitter::new(
            query,
            Collaborators::new(Arc::new(EchoLookup), runner),
            settings,
        )
    }

    #[test]
    fn test_emits_milestones_in_order() {
        let runner = Arc::new(RecordingRunner::default());
        let records: Vec<ProgressRecord> = emitter("What drove growth?", runner.clone(), unpaced(3))
            .collect::<Result<_, _>>()
            .expect("run succeeds");

        let texts: Vec<&str> = records.iter().map(ProgressRecord::text).collect();
        assert_eq!(
            texts,
            vec![
                "Starting analysis for query: 'What drove growth?'\n",
                "Agents configured. Starting tasks...\n",
                "Tasks defined. Running crew...\n",
                "Processing... step 1/3 completed.\n",
                "Processing... step 2/3 completed.\n",
                "Processing... step 3/3 completed.\n",
                "Final Result:\nRevenue grew.\n",
            ]
        );
        let seqs: Vec<u64> = records.iter().map(ProgressRecord::seq).collect();
        assert_eq!(seqs, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_runs_crew_exactly_once() {
        let runner = Arc::new(RecordingRunner::default());
        let mut steps = emitter("margins", runner.clone(), unpaced(2));

        // nothing runs until the final pull
        for _ in 0..5 {
            assert!(steps.next().is_some());
        }
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);

        assert!(steps.next().is_some());
        assert!(steps.next().is_none());
        assert!(steps.next().is_none());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        let crews = runner.crews.lock().expect("lock");
        assert_eq!(crews[0].tasks[0].description, "Analyze the query: 'margins'");
        assert_eq!(crews[0].roles.len(), 2);
    }

    #[test]
    fn test_empty_query_is_forwarded_verbatim() {
        let runner = Arc::new(RecordingRunner::default());
        let first = emitter("", runner, unpaced(0))
            .next()
            .expect("record")
            .expect("ok");
        assert_eq!(first.text(), "Starting analysis for query: ''\n");
    }

    #[test]
    fn test_zero_working_steps() {
        let runner = Arc::new(RecordingRunner::default());
        let texts: Vec<String> = emitter("q", runner, unpaced(0))
            .map(|r| r.expect("ok").into_text())
            .collect();
        assert_eq!(texts.len(), 4);
        assert_eq!(texts[3], "Final Result:\nRevenue grew.\n");
    }

    #[test]
    fn test_failure_ends_sequence_without_result() {
        let runner = Arc::new(RecordingRunner {
            fail: true,
            ..Default::default()
        });
        let items: Vec<RecordResult> = emitter("q", runner, unpaced(1)).collect();

        assert_eq!(items.len(), 5);
        assert!(items[..4].iter().all(Result::is_ok));
        let err = items[4].clone().expect_err("last item is the failure");
        assert_eq!(err.stage, "run_pipeline");
        assert!(!items
            .iter()
            .filter_map(|item| item.as_ref().ok())
            .any(|record| record.text().starts_with("Final Result:")));
    }

    #[test]
    fn test_pacing_between_records() {
        let runner = Arc::new(RecordingRunner::default());
        let settings = StreamConfig {
            step_delay_ms: 20,
            working_steps: 1,
            max_run_secs: None,
        };
        let mut steps = emitter("q", runner, settings);

        let started = Instant::now();
        steps.next();
        assert!(started.elapsed() < Duration::from_millis(20));

        let count = steps.count();
        assert_eq!(count, 4);
        // one pause before each of the four remaining records
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
