/// Resumable session bookkeeping: the session identifier and the sequence cursor.
///
/// The sequence never moves backwards. A lower value than the one already
/// recorded is reported and ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    sequence: Option<u64>,
    session_id: Option<String>,
}

/// Outcome of [`SessionState::record_sequence`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceUpdate {
    /// The sequence was stored
    Recorded,
    /// The value was lower than the current sequence and was ignored
    Regressed {
        /// Sequence already recorded
        current: u64,
        /// Value that was rejected
        received: u64,
    },
}

impl SessionState {
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Both halves needed to resume, if they are known.
    #[must_use]
    pub fn resumable(&self) -> Option<(&str, u64)> {
        Some((self.session_id.as_deref()?, self.sequence?))
    }

    pub fn record_sequence(&mut self, sequence: u64) -> SequenceUpdate {
        match self.sequence {
            Some(current) if sequence < current => {
                #[cfg(feature = "tracing")]
                tracing::warn!(current, received = sequence, "Ignoring sequence regression");
                SequenceUpdate::Regressed {
                    current,
                    received: sequence,
                }
            }
            _ => {
                self.sequence = Some(sequence);
                SequenceUpdate::Recorded
            }
        }
    }

    pub fn record_session(&mut self, session_id: String) {
        self.session_id = Some(session_id);
    }

    /// Forget the session and the sequence together.
    pub fn clear(&mut self) {
        self.sequence = None;
        self.session_id = None;
    }
}
