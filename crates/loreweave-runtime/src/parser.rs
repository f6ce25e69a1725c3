//! Tolerant extraction of a scene and its choices from raw model output.
//!
//! The model is asked for `Story: …` / `Choices:` / three numbered lines, but
//! nothing forces it to comply.  [`ResponseParser::parse`] is total: every
//! input yields a story string and exactly three choices, and the
//! [`ParseOutcome`] records which fallback (if any) produced them.
//!
//! * **Story** – the text between a `Story:` marker and a later line that
//!   starts with `Choices:`, trimmed.  Without that pair (or when the marked
//!   story is blank) the whole trimmed response is the story.
//! * **Choices** – every numbered item (`<integer>. <text>`) in the response,
//!   in order.  The first three are kept; fewer than three are discarded
//!   entirely in favour of [`DEFAULT_CHOICES`].

use loreweave_types::{DEFAULT_CHOICES, SceneResult};
use serde::{Deserialize, Serialize};

const STORY_MARKER: &str = "Story:";
const CHOICES_MARKER: &str = "Choices:";
const REQUIRED_CHOICES: usize = 3;

/// Which extraction paths succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseOutcome {
    /// Both the marked story and three numbered choices were found.
    Parsed,
    /// No usable `Story:`/`Choices:` pair; the whole response is the story.
    FallbackStory,
    /// Fewer than three numbered items; the default triple was used.
    FallbackChoices,
    /// Both fallbacks applied.
    FallbackStoryAndChoices,
}

impl ParseOutcome {
    fn from_flags(story_fallback: bool, choices_fallback: bool) -> Self {
        match (story_fallback, choices_fallback) {
            (false, false) => ParseOutcome::Parsed,
            (true, false) => ParseOutcome::FallbackStory,
            (false, true) => ParseOutcome::FallbackChoices,
            (true, true) => ParseOutcome::FallbackStoryAndChoices,
        }
    }

    pub fn used_fallback_story(self) -> bool {
        matches!(
            self,
            ParseOutcome::FallbackStory | ParseOutcome::FallbackStoryAndChoices
        )
    }

    pub fn used_fallback_choices(self) -> bool {
        matches!(
            self,
            ParseOutcome::FallbackChoices | ParseOutcome::FallbackStoryAndChoices
        )
    }
}

/// A parsed scene plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScene {
    pub story: String,
    pub choices: Vec<String>,
    pub outcome: ParseOutcome,
}

impl ParsedScene {
    pub fn into_scene(self) -> SceneResult {
        SceneResult::new(self.story, self.choices)
    }
}

/// Parses raw generated text into a [`ParsedScene`].
#[derive(Debug, Clone, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str) -> ParsedScene {
        let text = raw.trim();

        let (story, story_fallback) = match extract_story(text) {
            Some(story) => (story, false),
            None => (text.to_string(), true),
        };

        let mut items = extract_numbered_items(text);
        let choices_fallback = items.len() < REQUIRED_CHOICES;
        let choices = if choices_fallback {
            default_choices()
        } else {
            items.truncate(REQUIRED_CHOICES);
            items
        };

        ParsedScene {
            story,
            choices,
            outcome: ParseOutcome::from_flags(story_fallback, choices_fallback),
        }
    }
}

/// The fallback triple as owned strings.
pub fn default_choices() -> Vec<String> {
    DEFAULT_CHOICES.iter().map(|c| c.to_string()).collect()
}

/// Text between `Story:` and the next line beginning with `Choices:`.
///
/// `None` when either marker is missing or the story between them is blank.
pub fn extract_story(text: &str) -> Option<String> {
    let start = text.find(STORY_MARKER)? + STORY_MARKER.len();
    let rest = &text[start..];

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        // The first segment shares its line with `Story:` itself.
        if offset > 0 && line.trim_start().starts_with(CHOICES_MARKER) {
            let story = rest[..offset].trim();
            return (!story.is_empty()).then(|| story.to_string());
        }
        offset += line.len();
    }
    None
}

/// Every numbered item in `text`, in order of appearance.
///
/// A marker is an integer followed by `.`, standing at the start of a line
/// or after a non-alphanumeric character, and not followed by another digit
/// (so `3.5` is not an item).  A line that opens with a marker holds one item
/// running to the end of the line; otherwise each inline marker starts an
/// item that runs to the next marker.  Markdown emphasis left in front of the
/// item text is dropped.  Blank items are skipped.
pub fn extract_numbered_items(text: &str) -> Vec<String> {
    let mut items = Vec::new();
    for line in text.lines() {
        let mut markers = find_markers(line);
        let first_word = line.find(char::is_alphanumeric);
        if markers.first().is_some_and(|&(start, _)| Some(start) == first_word) {
            markers.truncate(1);
        }
        for (i, &(_, text_start)) in markers.iter().enumerate() {
            let text_end = markers.get(i + 1).map_or(line.len(), |&(start, _)| start);
            let item = line[text_start..text_end]
                .trim()
                .trim_start_matches(['*', '_'])
                .trim_start();
            if !item.is_empty() {
                items.push(item.to_string());
            }
        }
    }
    items
}

/// `(marker_start, text_start)` byte offsets of each numbered-item marker.
fn find_markers(line: &str) -> Vec<(usize, usize)> {
    let bytes = line.as_bytes();
    let mut markers = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let boundary_before = line[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric() && c != '.' && c != ',');
        let period_after = bytes.get(i) == Some(&b'.');
        let digit_after_period = bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit());
        if boundary_before && period_after && !digit_after_period {
            markers.push((start, i + 1));
            i += 1;
        }
    }
    markers
}
