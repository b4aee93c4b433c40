use std::fmt;
use thiserror::Error;

/// Lifecycle of one (player, season) pair within a run.
///
/// `Skipped` marks a stored pair that came up again and was not refetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeasonState {
    Pending,
    FetchingGames,
    ProcessingGames,
    Stored,
    RetryQueued,
    Failed,
    Skipped,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SeasonState,
    pub to: SeasonState,
}

impl SeasonState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SeasonState::Stored | SeasonState::Failed | SeasonState::Skipped)
    }

    pub fn can_transition_to(self, next: SeasonState) -> bool {
        use SeasonState::*;
        matches!(
            (self, next),
            (Pending, FetchingGames)
                | (FetchingGames, ProcessingGames)
                | (FetchingGames, RetryQueued)
                | (ProcessingGames, Stored)
                | (Stored, Skipped)
                | (RetryQueued, FetchingGames)
                | (RetryQueued, Failed)
        )
    }

    pub fn transition(self, next: SeasonState) -> Result<SeasonState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for SeasonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SeasonState::Pending => "pending",
            SeasonState::FetchingGames => "fetching_games",
            SeasonState::ProcessingGames => "processing_games",
            SeasonState::Stored => "stored",
            SeasonState::RetryQueued => "retry_queued",
            SeasonState::Failed => "failed",
            SeasonState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}
