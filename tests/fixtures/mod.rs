//! Dialogue segments used across the queue tests

use offload_queue::models::job::Segment;

pub struct SegmentFixture {
    pub speaker: &'static str,
    pub text: &'static str,
    pub start_time: f64,
    pub end_time: f64,
}

/// A short exchange with one segment per heuristic label.
pub const DIALOGUE: &[SegmentFixture] = &[
    SegmentFixture {
        speaker: "SPEAKER_00",
        text: "Where were you on the night of the ninth?",
        start_time: 0.0,
        end_time: 2.4,
    },
    SegmentFixture {
        speaker: "SPEAKER_01",
        text: "I was at home, I told you already.",
        start_time: 2.6,
        end_time: 4.9,
    },
    SegmentFixture {
        speaker: "SPEAKER_00",
        text: "Right.",
        start_time: 5.1,
        end_time: 5.5,
    },
    SegmentFixture {
        speaker: "SPEAKER_01",
        text: "Stop asking me that!",
        start_time: 5.8,
        end_time: 7.0,
    },
];

/// Fixture segments indexed in order.
pub fn dialogue_segments() -> Vec<Segment> {
    DIALOGUE
        .iter()
        .enumerate()
        .map(|(index, f)| Segment {
            index: index as u32,
            speaker: f.speaker.to_string(),
            text: f.text.to_string(),
            start_time: f.start_time,
            end_time: f.end_time,
        })
        .collect()
}
