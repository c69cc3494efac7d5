use std::collections::HashMap;
use std::time::SystemTime;

use super::types::{State, Task};
use crate::remote::types::PollOutcome;

pub fn valid_state_transition(src: &State, dst: &State) -> bool {
    let state_transition_map: HashMap<State, Vec<State>> = {
        let mut map = HashMap::new();
        // Uploading is reachable from everywhere: retry applies
        // regardless of the current state, terminal or not.
        map.insert(State::Waiting, vec![State::Uploading]);
        map.insert(
            State::Uploading,
            vec![State::Uploading, State::Submitting, State::Failed, State::Cancelled],
        );
        map.insert(
            State::Submitting,
            vec![State::Uploading, State::Running, State::Failed, State::Cancelled],
        );
        map.insert(
            State::Running,
            vec![
                State::Uploading,
                State::Running,
                State::Success,
                State::Failed,
                State::Cancelled,
            ],
        );
        map.insert(State::Success, vec![State::Uploading]);
        map.insert(State::Failed, vec![State::Uploading]);
        map.insert(State::Cancelled, vec![State::Uploading]);
        map
    };

    if let Some(valid_states) = state_transition_map.get(src) {
        valid_states.contains(dst)
    } else {
        false
    }
}

/// Move a task to `to` if the transition table allows it.
///
/// Entering `Uploading` is a (re)start: previous result, timing and job id
/// are cleared and the start timestamp is taken. Entering `Success` or
/// `Failed` fixes the elapsed duration. Returns false and leaves the task
/// untouched when the transition is invalid.
pub fn advance(task: &mut Task, to: State, label: &str) -> bool {
    if !valid_state_transition(&task.state, &to) {
        return false;
    }

    match to {
        State::Uploading => {
            task.result_url = None;
            task.elapsed = None;
            task.remote_job_id = None;
            task.started_at = Some(SystemTime::now());
        }
        State::Success | State::Failed => {
            task.elapsed = task
                .started_at
                .map(|t| t.elapsed().unwrap_or_default());
        }
        _ => {}
    }

    task.state = to;
    task.label = label.to_string();
    true
}

/// Apply a poll result to a task, but only while it is `Running`.
///
/// Anything arriving later — after a stop, a retry or a terminal
/// transition — is discarded, which makes duplicate terminal polls and
/// the cancel-vs-in-flight race no-ops. Returns whether the outcome was
/// applied.
pub fn apply_poll(task: &mut Task, outcome: &PollOutcome) -> bool {
    if task.state != State::Running {
        return false;
    }

    match outcome {
        PollOutcome::Running => {
            // Refresh the label only.
            task.label = "PROCESSING".to_string();
        }
        PollOutcome::Success { output } => {
            if advance(task, State::Success, "DONE") {
                task.result_url = Some(output.clone());
            }
        }
        PollOutcome::Failed { message } => {
            advance(task, State::Failed, message);
        }
    }

    true
}
