//! Dialogue Formatter: renders the debate's deterministic text artifacts from
//! inputs only, no I/O. Grounded in the teacher's template-substitution helper
//! (`MultiPromptChain::replace_template`) in spirit — plain string assembly,
//! no provider calls.

use crate::debate::Position;

const MAX_TOPIC_LEN: usize = 70;

fn truncate_topic(topic: &str) -> String {
    if topic.chars().count() > MAX_TOPIC_LEN {
        let truncated: String = topic.chars().take(MAX_TOPIC_LEN).collect();
        format!("{truncated}...")
    } else {
        topic.to_string()
    }
}

/// Introduction header. Must contain `HELIXAGENT AI DEBATE ENSEMBLE`, `TOPIC:`,
/// `DRAMATIS PERSONAE`, `THE DELIBERATION`.
pub fn format_introduction(topic: &str) -> String {
    format!(
        "=== HELIXAGENT AI DEBATE ENSEMBLE ===\n\
         TOPIC: {}\n\n\
         DRAMATIS PERSONAE:\n\
         - The Analyst\n\
         - The Proposer\n\
         - The Critic\n\
         - The Synthesizer\n\
         - The Mediator\n\n\
         THE DELIBERATION BEGINS:\n",
        truncate_topic(topic)
    )
}

/// Per-position response framing: opens with `"<character name>:\n"` and
/// contains exactly one opening quote before the response text.
pub fn format_turn(position: Position, response: &str) -> String {
    format!("{}:\n\"{}\"", position.character_name(), response)
}

/// Conclusion text: contains `CONSENSUS REACHED` and the word `synthesized`,
/// plus a footer mentioning `HelixAgent`, `Powered by`, and `5 AI perspectives`.
pub fn format_conclusion(final_answer: &str) -> String {
    format!(
        "=== CONSENSUS REACHED ===\n\
         The team's positions have been synthesized into the following answer:\n\n\
         {}\n\n\
         ---\n\
         HelixAgent — Powered by 5 AI perspectives.\n",
        final_answer
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn introduction_contains_required_markers() {
        let intro = format_introduction("short topic");
        assert!(intro.contains("HELIXAGENT AI DEBATE ENSEMBLE"));
        assert!(intro.contains("TOPIC:"));
        assert!(intro.contains("DRAMATIS PERSONAE"));
        assert!(intro.contains("THE DELIBERATION"));
    }

    #[test]
    fn long_topic_is_truncated() {
        let topic: String = std::iter::repeat('x').take(100).collect();
        let intro = format_introduction(&topic);
        assert!(intro.contains("...\n"));
    }

    #[test]
    fn turn_opens_with_character_name_and_one_quote() {
        let turn = format_turn(Position::Analyst, "some analysis");
        assert!(turn.starts_with("The Analyst:\n\""));
        assert_eq!(turn.matches('"').count(), 2);
    }

    #[test]
    fn conclusion_contains_required_markers() {
        let conclusion = format_conclusion("final answer text");
        assert!(conclusion.contains("CONSENSUS REACHED"));
        assert!(conclusion.contains("synthesized"));
        assert!(conclusion.contains("HelixAgent"));
        assert!(conclusion.contains("Powered by"));
        assert!(conclusion.contains("5 AI perspectives"));
    }
}
