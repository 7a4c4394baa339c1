//! Sequence and silence gap detection.
//!
//! Venues assign sequence numbers globally, not per subscription. When
//! subscribed to a partial-depth stream we only receive updates touching
//! the visible levels while the counter advances for every book change, so
//! forward jumps are NORMAL and must never be reported as gaps. A strict
//! monotonic check would produce thousands of false gaps per hour.
//!
//! A gap is recognized only when:
//! 1. the new sequence id is less than the previous one (regression), or
//! 2. the new sequence id equals the previous one (duplicate), or
//! 3. no message arrived for an instrument within the silence threshold.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use vigil_common::health::{GapMarker, GapReason};
use vigil_common::types::Venue;

#[derive(Debug)]
struct InstrumentTrack {
    last_seq: u64,
    last_message_at: DateTime<Utc>,
    /// Set once a silence gap has been reported; cleared on the next message.
    silence_reported: bool,
}

/// Per-venue sequence and silence tracking across instruments.
#[derive(Debug)]
pub struct SequenceTracker {
    venue: Venue,
    silence_threshold: Duration,
    tracks: HashMap<String, InstrumentTrack>,
}

impl SequenceTracker {
    pub fn new(venue: Venue, silence_threshold: Duration) -> Self {
        Self {
            venue,
            silence_threshold,
            tracks: HashMap::new(),
        }
    }

    /// Record one message and detect sequence gaps.
    ///
    /// Returns a gap marker for regressions and duplicates only; forward
    /// jumps of any size return None. The tracker adopts the new sequence
    /// either way so the stream keeps flowing after a venue-side reset.
    pub fn observe(
        &mut self,
        instrument: &str,
        sequence_id: u64,
        now: DateTime<Utc>,
    ) -> Option<GapMarker> {
        let track = match self.tracks.get_mut(instrument) {
            Some(track) => track,
            None => {
                self.tracks.insert(
                    instrument.to_string(),
                    InstrumentTrack {
                        last_seq: sequence_id,
                        last_message_at: now,
                        silence_reported: false,
                    },
                );
                return None;
            }
        };

        let prev_seq = track.last_seq;
        let gap = if sequence_id < prev_seq {
            Some(GapMarker::new(
                self.venue,
                instrument,
                track.last_message_at,
                now,
                GapReason::SequenceRegression,
                Some(prev_seq),
                Some(sequence_id),
            ))
        } else if sequence_id == prev_seq {
            Some(GapMarker::new(
                self.venue,
                instrument,
                now,
                now,
                GapReason::Duplicate,
                Some(prev_seq),
                Some(sequence_id),
            ))
        } else {
            None
        };

        track.last_seq = sequence_id;
        track.last_message_at = now;
        track.silence_reported = false;

        gap
    }

    /// Report instruments that have been silent past the threshold.
    ///
    /// Each silent period is reported once; tracking resumes on the next
    /// message for that instrument.
    pub fn check_silence(&mut self, now: DateTime<Utc>) -> Vec<GapMarker> {
        let threshold = chrono::Duration::from_std(self.silence_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));

        let mut gaps = Vec::new();
        for (instrument, track) in &mut self.tracks {
            if track.silence_reported {
                continue;
            }
            if now - track.last_message_at >= threshold {
                gaps.push(GapMarker::new(
                    self.venue,
                    instrument.clone(),
                    track.last_message_at,
                    now,
                    GapReason::Timeout,
                    Some(track.last_seq),
                    None,
                ));
                track.silence_reported = true;
            }
        }
        gaps
    }

    /// Record activity without sequence comparison.
    ///
    /// Used for REST-polled snapshots, whose sequence ids are not
    /// comparable with the streamed counter; keeps silence detection from
    /// firing while the fallback path is delivering data.
    pub fn touch(&mut self, instrument: &str, now: DateTime<Utc>) {
        match self.tracks.get_mut(instrument) {
            Some(track) => {
                track.last_message_at = now;
                track.silence_reported = false;
            }
            None => {
                self.tracks.insert(
                    instrument.to_string(),
                    InstrumentTrack {
                        last_seq: 0,
                        last_message_at: now,
                        silence_reported: false,
                    },
                );
            }
        }
    }

    /// (instrument, last sequence, last message time) for every tracked
    /// instrument. Captured at disconnect to bound the reconnect gap.
    pub fn tracked_state(&self) -> Vec<(String, u64, DateTime<Utc>)> {
        self.tracks
            .iter()
            .map(|(instrument, track)| {
                (instrument.clone(), track.last_seq, track.last_message_at)
            })
            .collect()
    }

    /// Last observed sequence id for an instrument.
    pub fn last_sequence(&self, instrument: &str) -> Option<u64> {
        self.tracks.get(instrument).map(|t| t.last_seq)
    }

    /// Last message timestamp across all instruments.
    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.tracks.values().map(|t| t.last_message_at).max()
    }

    /// Drop tracking state for an instrument (unsubscribe).
    pub fn forget(&mut self, instrument: &str) {
        self.tracks.remove(instrument);
    }
}
