//! Narrator prompt construction.
//!
//! The composed prompt pins the exact output shape the
//! [`ResponseParser`][crate::parser::ResponseParser] expects:
//!
//! ```text
//! Story: <text>
//! Choices:
//! 1. <text>
//! 2. <text>
//! 3. <text>
//! ```
//!
//! Whether the player's input belongs to the story is left to the model:
//! the prompt tells it to answer off-topic input with a short in-character
//! refusal that still ends in three choices.

/// Label used when the player gave no additional input.
pub const MISSING_INPUT_LABEL: &str = "None";

/// Builds the generation request for one cycle.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    role: String,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self {
            role: "You are the narrative director of an interactive story, acting as its Dungeon Master."
                .to_string(),
        }
    }
}

impl PromptComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the opening framing sentence (builder-style).
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Compose the prompt from retrieved context and the player's inputs.
    ///
    /// `past_context` is embedded verbatim, even when empty.  A missing
    /// `secondary_input` is written out as `None`.
    pub fn compose(
        &self,
        past_context: &str,
        player_input: &str,
        secondary_input: Option<&str>,
    ) -> String {
        let secondary = secondary_input
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(MISSING_INPUT_LABEL);

        format!(
            "{role} Continue the story based on past events.\n\
             \n\
             Past Context:\n\
             {past_context}\n\
             \n\
             The player provided input: {player_input}\n\
             Additional input: {secondary}\n\
             \n\
             Provide a vivid scene followed by exactly three choices.\n\
             Keep responses short and in easy English.\n\
             \n\
             If the player's input is not one of the offered choices and is unrelated to the story, \
             do not continue the scene: the Story text must instead be a short in-character rebuttal \
             asking the player to follow the game, followed by the same three-choice structure.\n\
             \n\
             Respond in exactly this format and nothing else:\n\
             Story: <the scene, or the short in-character rebuttal>\n\
             Choices:\n\
             1. <choice one>\n\
             2. <choice two>\n\
             3. <choice three>\n",
            role = self.role,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn past_context_is_embedded_verbatim() {
        let context = "The door is locked.\nA key glints under the mat.";
        let prompt = PromptComposer::new().compose(context, "look around", None);
        assert!(prompt.contains("Past Context:\nThe door is locked.\nA key glints under the mat.\n"));
    }

    #[test]
    fn empty_context_still_produces_full_prompt() {
        let prompt = PromptComposer::new().compose("", "open the door", None);
        assert!(prompt.contains("Past Context:\n\n"));
        assert!(prompt.contains("The player provided input: open the door"));
        assert!(prompt.contains("Choices:\n1. <choice one>\n2. <choice two>\n3. <choice three>"));
    }

    #[test]
    fn missing_secondary_input_is_labelled_none() {
        let prompt = PromptComposer::new().compose("", "open the door", None);
        assert!(prompt.contains("Additional input: None"));

        let blank = PromptComposer::new().compose("", "open the door", Some("   "));
        assert!(blank.contains("Additional input: None"));
    }

    #[test]
    fn secondary_input_is_embedded() {
        let prompt = PromptComposer::new().compose("", "Go left", Some("while humming"));
        assert!(prompt.contains("Additional input: while humming"));
    }

    #[test]
    fn prompt_mandates_output_shape_and_refusal_branch() {
        let prompt = PromptComposer::new().compose("", "bake a cake", None);
        assert!(prompt.contains("Story: <"));
        assert!(prompt.contains("exactly three choices"));
        assert!(prompt.contains("in-character rebuttal"));
        assert!(prompt.starts_with("You are the narrative director"));
    }

    #[test]
    fn role_can_be_replaced() {
        let prompt = PromptComposer::new()
            .with_role("You narrate a noir mystery.")
            .compose("", "light a cigarette", None);
        assert!(prompt.starts_with("You narrate a noir mystery. Continue the story"));
    }
}
