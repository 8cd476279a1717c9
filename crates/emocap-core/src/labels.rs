//! Emotion vocabulary, key bindings, and raw-key translation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Key that stores the current frame's landmarks under the selected label.
pub const SAVE_KEY: char = '=';

/// Closed set of labels a sample can carry.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Happy,
    Sad,
    #[default]
    Neutral,
    Surprise,
    Fear,
    Disgust,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Neutral,
        Emotion::Surprise,
        Emotion::Fear,
        Emotion::Disgust,
    ];

    /// Name written to the dataset's `label` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Neutral => "neutral",
            Emotion::Surprise => "surprise",
            Emotion::Fear => "fear",
            Emotion::Disgust => "disgust",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown label: {0}")]
pub struct UnknownLabel(pub String);

impl FromStr for Emotion {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

/// A keystroke as delivered by the input device, before interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKey {
    /// Nothing was pending within the poll budget.
    None,
    Char(char),
    Esc,
}

/// What a keystroke means to the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    None,
    Switch(Emotion),
    Save,
    Quit,
}

/// Static key → label table. Never mutated at runtime.
pub struct LabelRegistry;

const BINDINGS: [(char, Emotion); 7] = [
    ('a', Emotion::Angry),
    ('h', Emotion::Happy),
    ('s', Emotion::Sad),
    ('n', Emotion::Neutral),
    ('u', Emotion::Surprise),
    ('f', Emotion::Fear),
    ('d', Emotion::Disgust),
];

impl LabelRegistry {
    /// All key bindings, in display order.
    pub fn bindings() -> &'static [(char, Emotion)] {
        &BINDINGS
    }

    /// Label bound to `key`. Only lowercase ASCII letters can match.
    pub fn lookup(key: char) -> Option<Emotion> {
        if !key.is_ascii_lowercase() {
            return None;
        }
        BINDINGS.iter().find(|(k, _)| *k == key).map(|(_, e)| *e)
    }

    /// Translate a raw keystroke into a session event.
    pub fn translate(key: RawKey) -> KeyEvent {
        match key {
            RawKey::None => KeyEvent::None,
            RawKey::Esc => KeyEvent::Quit,
            RawKey::Char(SAVE_KEY) => KeyEvent::Save,
            RawKey::Char(c) => Self::lookup(c).map_or(KeyEvent::None, KeyEvent::Switch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_bindings_translate_to_switch() {
        for &(key, emotion) in LabelRegistry::bindings() {
            assert_eq!(
                LabelRegistry::translate(RawKey::Char(key)),
                KeyEvent::Switch(emotion)
            );
        }
    }

    #[test]
    fn test_bindings_cover_every_emotion_once() {
        let mut bound: Vec<Emotion> = LabelRegistry::bindings().iter().map(|(_, e)| *e).collect();
        bound.sort();
        let mut all = Emotion::ALL.to_vec();
        all.sort();
        assert_eq!(bound, all);
    }

    #[test]
    fn test_save_and_quit_keys() {
        assert_eq!(LabelRegistry::translate(RawKey::Char('=')), KeyEvent::Save);
        assert_eq!(LabelRegistry::translate(RawKey::Esc), KeyEvent::Quit);
        assert_eq!(LabelRegistry::translate(RawKey::None), KeyEvent::None);
    }

    #[test]
    fn test_unbound_keys_are_ignored() {
        for c in ['x', 'z', 'H', 'A', '1', ' ', '+', 'é'] {
            assert_eq!(LabelRegistry::translate(RawKey::Char(c)), KeyEvent::None, "{c:?}");
        }
    }

    #[test]
    fn test_label_names_round_trip() {
        for e in Emotion::ALL {
            assert_eq!(e.as_str().parse::<Emotion>(), Ok(e));
        }
        assert_eq!(
            "contempt".parse::<Emotion>(),
            Err(UnknownLabel("contempt".into()))
        );
    }

    #[test]
    fn test_default_label_is_neutral() {
        assert_eq!(Emotion::default(), Emotion::Neutral);
        assert_eq!(Emotion::Surprise.to_string(), "surprise");
    }
}
