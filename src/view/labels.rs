use crate::remote::LabelSpan;

/// A labeled time span of the track.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioLabel {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

impl From<LabelSpan> for AudioLabel {
    fn from(span: LabelSpan) -> Self {
        Self {
            start_sec: span.start,
            end_sec: span.end,
            text: span.value,
        }
    }
}

/// Labels overlapping `[start, start + span)`.
pub fn visible_labels(all: &[AudioLabel], start: f64, span: f64) -> Vec<AudioLabel> {
    let end = start + span;
    all.iter()
        .filter(|l| l.end_sec > start && l.start_sec < end)
        .cloned()
        .collect()
}

/// Result of one label job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisibleLabels {
    pub generation: u64,
    pub start_sec: f64,
    pub labels: Vec<AudioLabel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(start: f64, end: f64) -> AudioLabel {
        AudioLabel {
            start_sec: start,
            end_sec: end,
            text: format!("{}-{}", start, end),
        }
    }

    #[test]
    fn overlap_filter_is_half_open() {
        let all = vec![label(0.0, 5.0), label(4.0, 6.0), label(9.9, 12.0), label(10.0, 11.0), label(1.0, 2.0)];
        let seen = visible_labels(&all, 5.0, 5.0);
        assert_eq!(seen, vec![label(4.0, 6.0), label(9.9, 12.0)]);
    }

    #[test]
    fn spans_become_labels() {
        let l: AudioLabel = LabelSpan {
            start: 1.0,
            end: 2.0,
            num: 0.5,
            value: "bird".into(),
        }
        .into();
        assert_eq!(l, AudioLabel {
            start_sec: 1.0,
            end_sec: 2.0,
            text: "bird".into(),
        });
    }
}
