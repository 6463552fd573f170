//! Merge and label engine
//!
//! Turns the globalized raw segments of all chunks into the final
//! role-labeled transcript. Five passes run in order over the full list:
//! dedup, style-noise filtering, micro-interruption compaction,
//! same-speaker run merging, and role assignment. The whole pipeline is
//! deterministic given identical inputs.

pub mod lexicon;

use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{round_ms, RawSegment, Role, Segment, SpeakerRoleConfig};

/// Segments with equal text combine when they overlap within this many
/// seconds (chunk-overlap echoes).
const DEDUP_TOLERANCE_SEC: f64 = 0.25;
/// Backchannel word budget for whole-utterance dropping.
const BACKCHANNEL_MAX_WORDS: usize = 2;
/// Backchannel word budget for micro-interruption compaction.
const MICRO_BACKCHANNEL_MAX_WORDS: usize = 3;
/// Maximum gap on either side of a compacted micro-interruption.
const MICRO_GAP_SEC: f64 = 8.0;
/// Maximum gap fused by the same-speaker run merge.
const RUN_MERGE_GAP_SEC: f64 = 10.0;
/// Speakers appearing within this window earn a start bonus.
const START_BONUS_WINDOW_SEC: f64 = 120.0;

pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Runs all passes and produces the final transcript in time order.
    pub fn merge(&self, segments: Vec<RawSegment>, roles: SpeakerRoleConfig) -> Vec<Segment> {
        let deduped = dedup_segments(segments);
        let filtered = filter_style_noise(deduped);
        let compacted = compact_micro_interruptions(filtered);
        let runs = merge_speaker_runs(compacted);
        debug!("Merge passes left {} utterances", runs.len());
        assign_roles(runs, roles)
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Pass 1: removes chunk-overlap duplicates. Consecutive segments (in
/// `(start, end)` order) combine when their normalized texts are equal and
/// they overlap within the tolerance, or when one text is a prefix of the
/// other from the same speaker and the ranges overlap.
pub fn dedup_segments(mut segments: Vec<RawSegment>) -> Vec<RawSegment> {
    segments.sort_by(|a, b| {
        (a.start_sec, a.end_sec)
            .partial_cmp(&(b.start_sec, b.end_sec))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut result: Vec<RawSegment> = Vec::with_capacity(segments.len());
    for next in segments {
        let Some(current) = result.last_mut() else {
            result.push(next);
            continue;
        };

        let current_norm = lexicon::normalize(&current.text);
        let next_norm = lexicon::normalize(&next.text);
        let overlaps_with_tolerance = next.start_sec <= current.end_sec + DEDUP_TOLERANCE_SEC;
        let overlaps = next.start_sec < current.end_sec;

        // (a) identical text, overlapping: keep the longest range and the
        // higher confidence; the longer occurrence donates text & speaker.
        if !current_norm.is_empty() && current_norm == next_norm && overlaps_with_tolerance {
            let current_len = current.end_sec - current.start_sec;
            let next_len = next.end_sec - next.start_sec;
            if next_len > current_len {
                current.text = next.text;
                current.speaker_id = next.speaker_id;
            }
            current.start_sec = current.start_sec.min(next.start_sec);
            current.end_sec = current.end_sec.max(next.end_sec);
            current.confidence = max_confidence(current.confidence, next.confidence);
            continue;
        }

        // (b) prefix continuation from the same speaker: keep the longer
        // text and the later confidence.
        let is_prefix_pair =
            current_norm.starts_with(&next_norm) || next_norm.starts_with(&current_norm);
        if current.speaker_id == next.speaker_id
            && overlaps
            && is_prefix_pair
            && !current_norm.is_empty()
            && !next_norm.is_empty()
        {
            if next_norm.len() > current_norm.len() {
                current.text = next.text;
            }
            current.end_sec = current.end_sec.max(next.end_sec);
            current.confidence = next.confidence.or(current.confidence);
            continue;
        }

        result.push(next);
    }
    result
}

/// Pass 2: strips filler tokens inside each utterance, then drops pure
/// backchannels and technical-meta utterances entirely.
pub fn filter_style_noise(segments: Vec<RawSegment>) -> Vec<RawSegment> {
    segments
        .into_iter()
        .filter_map(|mut segment| {
            segment.text = strip_fillers(&segment.text);
            let normalized = lexicon::normalize(&segment.text);

            if normalized.is_empty() {
                return None;
            }
            if lexicon::is_backchannel(&normalized, BACKCHANNEL_MAX_WORDS) {
                return None;
            }
            if lexicon::is_technical_meta(&normalized) {
                return None;
            }
            Some(segment)
        })
        .collect()
}

/// Pass 3: deletes short backchannel interjections sandwiched between two
/// utterances of one other speaker with small gaps on both sides.
pub fn compact_micro_interruptions(segments: Vec<RawSegment>) -> Vec<RawSegment> {
    if segments.len() < 3 {
        return segments;
    }

    let mut drop = vec![false; segments.len()];
    for i in 1..segments.len() - 1 {
        let (prev, curr, next) = (&segments[i - 1], &segments[i], &segments[i + 1]);
        let normalized = lexicon::normalize(&curr.text);

        if lexicon::is_backchannel(&normalized, MICRO_BACKCHANNEL_MAX_WORDS)
            && prev.speaker_id == next.speaker_id
            && prev.speaker_id != curr.speaker_id
            && curr.start_sec - prev.end_sec <= MICRO_GAP_SEC
            && next.start_sec - curr.end_sec <= MICRO_GAP_SEC
        {
            drop[i] = true;
        }
    }

    segments
        .into_iter()
        .zip(drop)
        .filter_map(|(segment, dropped)| (!dropped).then_some(segment))
        .collect()
}

/// Pass 4: fuses consecutive segments from the same speaker whose gap is
/// at most ten seconds, joining text with a single space.
pub fn merge_speaker_runs(segments: Vec<RawSegment>) -> Vec<RawSegment> {
    let mut result: Vec<RawSegment> = Vec::with_capacity(segments.len());
    for next in segments {
        let Some(current) = result.last_mut() else {
            result.push(next);
            continue;
        };

        if current.speaker_id == next.speaker_id
            && next.start_sec - current.end_sec <= RUN_MERGE_GAP_SEC
        {
            current.text = collapse_whitespace(&format!("{} {}", current.text, next.text));
            current.end_sec = current.end_sec.max(next.end_sec);
            current.confidence = avg_confidence(current.confidence, next.confidence);
        } else {
            result.push(next);
        }
    }
    result
}

/// Pass 5: maps internal speaker ids to the two output roles.
///
/// A lone speaker is the interviewer. Otherwise speakers are ranked by
/// `3·(questions/utterances) + startBonus + 2·(1/max(1, avgWords))` and the
/// top slots (proportional to the configured interviewer share) become I.
pub fn assign_roles(segments: Vec<RawSegment>, roles: SpeakerRoleConfig) -> Vec<Segment> {
    #[derive(Debug, Default)]
    struct SpeakerStats {
        first: f64,
        utterances: u32,
        questions: u32,
        words: u32,
    }

    let mut stats: BTreeMap<String, SpeakerStats> = BTreeMap::new();
    for segment in &segments {
        let entry = stats
            .entry(segment.speaker_id.clone())
            .or_insert_with(|| SpeakerStats {
                first: segment.start_sec,
                ..Default::default()
            });
        entry.first = entry.first.min(segment.start_sec);
        entry.utterances += 1;
        entry.questions += segment.text.matches('?').count() as u32;
        entry.words += segment.text.split_whitespace().count() as u32;
    }

    let unique = stats.len();
    let interviewer_ids: Vec<String> = if unique <= 1 {
        stats.keys().cloned().collect()
    } else {
        let mut ranked: Vec<(String, f64, f64)> = stats
            .iter()
            .map(|(id, s)| {
                let utterances = s.utterances.max(1) as f64;
                let question_rate = s.questions as f64 / utterances;
                let start_bonus = (1.0 - (s.first / START_BONUS_WINDOW_SEC).min(1.0)).max(0.0);
                let avg_words = s.words as f64 / utterances;
                let score = 3.0 * question_rate + start_bonus + 2.0 * (1.0 / avg_words.max(1.0));
                (id.clone(), score, s.first)
            })
            .collect();

        // Highest score first; ties go to the earlier first appearance
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
        });

        let share = roles.interviewers as f64 / (roles.interviewers + roles.participants) as f64;
        let mut slots = (unique as f64 * share).round() as usize;
        slots = if roles.participants > 0 {
            slots.clamp(1, unique - 1)
        } else {
            slots.clamp(1, unique)
        };

        ranked.into_iter().take(slots).map(|(id, _, _)| id).collect()
    };

    segments
        .into_iter()
        .map(|segment| {
            let speaker = if interviewer_ids.contains(&segment.speaker_id) {
                Role::I
            } else {
                Role::D
            };
            Segment {
                start_sec: round_ms(segment.start_sec),
                end_sec: round_ms(segment.end_sec),
                speaker,
                text: segment.text.trim().to_string(),
                confidence: segment.confidence,
            }
        })
        .collect()
}

/// Removes filler words, preserving everything else verbatim.
fn strip_fillers(text: &str) -> String {
    let kept: Vec<&str> = text
        .split_whitespace()
        .filter(|word| {
            let normalized = lexicon::normalize(word);
            !lexicon::FILLER_TOKENS.contains(&normalized.as_str())
        })
        .collect();
    kept.join(" ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

fn max_confidence(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (value, None) | (None, value) => value,
    }
}

fn avg_confidence(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (value, None) | (None, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(
        start: f64,
        end: f64,
        speaker: &str,
        text: &str,
        confidence: Option<f64>,
    ) -> RawSegment {
        RawSegment::new(start, end, speaker, text, confidence)
    }

    #[test]
    fn single_speaker_becomes_interviewer() {
        // S1: one short utterance, default 1/1 roles
        let segments = vec![raw(
            0.0,
            3.0,
            "speaker_0",
            "Hej, det er bare mig der taler.",
            Some(0.55),
        )];
        let merged = MergeEngine::new().merge(segments, SpeakerRoleConfig::default());

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].speaker, Role::I);
        assert_eq!(merged[0].text, "Hej, det er bare mig der taler.");
        assert_eq!(merged[0].start_sec, 0.0);
        assert_eq!(merged[0].end_sec, 3.0);
    }

    #[test]
    fn two_interviewers_rank_above_participant() {
        // S2: question-heavy speakers 0 and 2 take the two interviewer slots
        let segments = vec![
            raw(0.0, 4.0, "speaker_0", "Hvordan oplevede du det første møde?", Some(0.9)),
            raw(
                5.0,
                10.0,
                "speaker_1",
                "Jeg oplevede det som et meget roligt og tydeligt forløb.",
                Some(0.9),
            ),
            raw(
                11.0,
                15.0,
                "speaker_2",
                "Vil du uddybe hvad der var mest udfordrende?",
                Some(0.9),
            ),
        ];
        let merged = MergeEngine::new().merge(segments, SpeakerRoleConfig::new(2, 1));

        let roles: Vec<Role> = merged.iter().map(|s| s.speaker).collect();
        assert_eq!(roles, vec![Role::I, Role::D, Role::I]);
    }

    #[test]
    fn backchannel_interruption_is_compacted_into_one_run() {
        // S3: the "Ja" disappears and the interviewer run fuses
        let segments = vec![
            raw(0.0, 2.0, "speaker_0", "Og hvordan gik det så?", None),
            raw(2.0, 2.5, "speaker_1", "Ja", None),
            raw(3.0, 8.0, "speaker_0", "Jeg mener med kollegerne bagefter.", None),
        ];
        let merged = MergeEngine::new().merge(segments, SpeakerRoleConfig::default());

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].speaker, Role::I);
        assert_eq!(
            merged[0].text,
            "Og hvordan gik det så? Jeg mener med kollegerne bagefter."
        );
    }

    #[test]
    fn dedup_combines_overlap_echoes() {
        let segments = vec![
            raw(10.0, 14.0, "speaker_0", "Det var en god dag", Some(0.6)),
            raw(10.1, 14.2, "speaker_0", "Det var en god dag", Some(0.8)),
        ];
        let deduped = dedup_segments(segments);

        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].start_sec, 10.0);
        assert_eq!(deduped[0].end_sec, 14.2);
        assert_eq!(deduped[0].confidence, Some(0.8));
    }

    #[test]
    fn dedup_prefix_keeps_longer_text_and_later_confidence() {
        let segments = vec![
            raw(10.0, 12.0, "speaker_0", "Det var en", Some(0.5)),
            raw(11.0, 14.0, "speaker_0", "Det var en god dag", Some(0.7)),
        ];
        let deduped = dedup_segments(segments);

        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].text, "Det var en god dag");
        assert_eq!(deduped[0].confidence, Some(0.7));
        assert_eq!(deduped[0].end_sec, 14.0);
    }

    #[test]
    fn fillers_are_stripped_but_content_survives() {
        let segments = vec![raw(
            0.0,
            5.0,
            "speaker_0",
            "Øhm jeg tænkte øh at vi kunne starte",
            None,
        )];
        let filtered = filter_style_noise(segments);

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].text, "jeg tænkte at vi kunne starte");
    }

    #[test]
    fn technical_meta_utterances_are_dropped() {
        let segments = vec![
            raw(0.0, 2.0, "speaker_0", "Er mikrofonen tændt?", None),
            raw(3.0, 20.0, "speaker_1", "Jeg startede i afdelingen for tre år siden.", None),
        ];
        let filtered = filter_style_noise(segments);

        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].text.contains("afdelingen"));
    }

    #[test]
    fn merge_is_idempotent_on_its_own_output() {
        let engine = MergeEngine::new();
        let input = vec![
            raw(0.0, 4.0, "speaker_0", "Hvordan oplevede du det?", Some(0.9)),
            raw(5.0, 9.0, "speaker_1", "Det var en lang og spændende proces.", Some(0.8)),
            raw(10.0, 13.0, "speaker_0", "Hvad var det bedste?", Some(0.9)),
        ];
        let first = engine.merge(input, SpeakerRoleConfig::default());

        // Feed the output back in as raw segments labeled by role
        let as_raw: Vec<RawSegment> = first
            .iter()
            .map(|s| {
                raw(
                    s.start_sec,
                    s.end_sec,
                    s.speaker.as_str(),
                    &s.text,
                    s.confidence,
                )
            })
            .collect();
        let second = engine.merge(as_raw, SpeakerRoleConfig::default());

        let texts_first: Vec<&str> = first.iter().map(|s| s.text.as_str()).collect();
        let texts_second: Vec<&str> = second.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts_first, texts_second);

        let roles_first: Vec<Role> = first.iter().map(|s| s.speaker).collect();
        let roles_second: Vec<Role> = second.iter().map(|s| s.speaker).collect();
        assert_eq!(roles_first, roles_second);
    }

    #[test]
    fn distant_same_speaker_segments_stay_separate() {
        let segments = vec![
            raw(0.0, 2.0, "speaker_0", "Første del.", None),
            raw(20.0, 22.0, "speaker_0", "Anden del.", None),
        ];
        let runs = merge_speaker_runs(segments);
        assert_eq!(runs.len(), 2);
    }

    #[test]
    fn output_is_time_ordered_and_rounded() {
        let segments = vec![
            raw(5.000_4, 8.0, "speaker_1", "Senere svar her fra deltageren i samtalen", None),
            raw(0.0, 2.0, "speaker_0", "Hvad skete der?", None),
        ];
        let merged = MergeEngine::new().merge(segments, SpeakerRoleConfig::default());

        assert!(merged.len() >= 2);
        for pair in merged.windows(2) {
            assert!(pair[0].start_sec <= pair[1].start_sec);
        }
        assert_eq!(merged[1].start_sec, 5.0);
    }
}
