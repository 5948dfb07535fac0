use selah_llm::{StreamEventMapped, StreamEventPayload};

use crate::stream::{GenerationOutcome, GenerationTarget};

/// Folds provider events for one target into the reply text.
///
/// Each accepted delta yields the full text so far, which the caller writes over the
/// placeholder. Events for other targets and anything after the terminal event are ignored.
#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    target: GenerationTarget,
    text: String,
    outcome: Option<GenerationOutcome>,
}

/// What one folded event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccumulatorStep {
    Ignored,
    Text(String),
    Finished(GenerationOutcome),
}

impl StreamAccumulator {
    pub fn new(target: GenerationTarget) -> Self {
        Self {
            target,
            text: String::new(),
            outcome: None,
        }
    }

    pub fn target(&self) -> GenerationTarget {
        self.target
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn outcome(&self) -> Option<&GenerationOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn push_delta(&mut self, chunk: &str) -> AccumulatorStep {
        if self.is_finished() || chunk.is_empty() {
            return AccumulatorStep::Ignored;
        }
        self.text.push_str(chunk);
        AccumulatorStep::Text(self.text.clone())
    }

    /// Ends the fold. Only the first terminal outcome sticks.
    pub fn finish(&mut self, outcome: GenerationOutcome) -> AccumulatorStep {
        if self.is_finished() {
            return AccumulatorStep::Ignored;
        }
        self.outcome = Some(outcome.clone());
        AccumulatorStep::Finished(outcome)
    }

    pub fn apply(&mut self, event: StreamEventMapped) -> AccumulatorStep {
        if !self.target.matches_provider(event.target) {
            return AccumulatorStep::Ignored;
        }

        match event.payload {
            StreamEventPayload::Delta(chunk) => self.push_delta(&chunk),
            StreamEventPayload::Done => self.finish(GenerationOutcome::Completed),
            StreamEventPayload::Error(message) => self.finish(GenerationOutcome::Failed(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use selah_storage::{MessageId, SessionId};

    use super::*;

    fn target() -> GenerationTarget {
        GenerationTarget::new(SessionId::new_v7(), MessageId::new_v7())
    }

    #[test]
    fn each_delta_reports_full_text_so_far() {
        let target = target();
        let provider = target.to_provider();
        let mut accumulator = StreamAccumulator::new(target);

        assert_eq!(
            accumulator.apply(StreamEventMapped::delta(provider, "Grace ")),
            AccumulatorStep::Text("Grace ".to_string())
        );
        assert_eq!(
            accumulator.apply(StreamEventMapped::delta(provider, "is ")),
            AccumulatorStep::Text("Grace is ".to_string())
        );
        assert_eq!(
            accumulator.apply(StreamEventMapped::delta(provider, "unearned favor.")),
            AccumulatorStep::Text("Grace is unearned favor.".to_string())
        );
        assert_eq!(
            accumulator.apply(StreamEventMapped::done(provider)),
            AccumulatorStep::Finished(GenerationOutcome::Completed)
        );
        assert_eq!(accumulator.text(), "Grace is unearned favor.");
    }

    #[test]
    fn foreign_targets_are_ignored() {
        let mut accumulator = StreamAccumulator::new(target());
        let stranger = target().to_provider();

        assert_eq!(
            accumulator.apply(StreamEventMapped::delta(stranger, "leak")),
            AccumulatorStep::Ignored
        );
        assert_eq!(
            accumulator.apply(StreamEventMapped::done(stranger)),
            AccumulatorStep::Ignored
        );
        assert!(accumulator.text().is_empty());
        assert!(!accumulator.is_finished());
    }

    #[test]
    fn events_after_terminal_are_dropped() {
        let target = target();
        let provider = target.to_provider();
        let mut accumulator = StreamAccumulator::new(target);

        accumulator.apply(StreamEventMapped::delta(provider, "partial"));
        accumulator.apply(StreamEventMapped::error(provider, "network down"));

        assert_eq!(
            accumulator.apply(StreamEventMapped::delta(provider, " more")),
            AccumulatorStep::Ignored
        );
        assert_eq!(
            accumulator.apply(StreamEventMapped::done(provider)),
            AccumulatorStep::Ignored
        );
        assert_eq!(accumulator.text(), "partial");
        assert_eq!(
            accumulator.outcome(),
            Some(&GenerationOutcome::Failed("network down".to_string()))
        );
    }

    proptest! {
        #[test]
        fn final_text_is_concatenation_of_deltas(chunks in prop::collection::vec(".{0,12}", 0..24)) {
            let target = target();
            let provider = target.to_provider();
            let mut accumulator = StreamAccumulator::new(target);
            let mut last_seen = String::new();

            for chunk in &chunks {
                if let AccumulatorStep::Text(text) =
                    accumulator.apply(StreamEventMapped::delta(provider, chunk.clone()))
                {
                    prop_assert!(text.starts_with(&last_seen));
                    last_seen = text;
                }
            }
            accumulator.apply(StreamEventMapped::done(provider));

            prop_assert_eq!(accumulator.text(), chunks.concat());
            prop_assert_eq!(last_seen, chunks.concat());
        }
    }
}
