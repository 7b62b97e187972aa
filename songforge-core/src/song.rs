use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MIN_DURATION_SECS: u32 = 30;
pub const MAX_DURATION_SECS: u32 = 180;
pub const DURATION_STEP_SECS: u32 = 30;
pub const DEFAULT_DURATION_SECS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Genre {
    Pop,
    Rock,
    #[serde(rename = "Hip-Hop")]
    HipHop,
    Classical,
    Jazz,
    Electronic,
    Folk,
    Country,
    Reggae,
    Blues,
}

impl Genre {
    /// All genres in the order they are offered to the user.
    pub const ALL: [Genre; 10] = [
        Genre::Pop,
        Genre::Rock,
        Genre::HipHop,
        Genre::Classical,
        Genre::Jazz,
        Genre::Electronic,
        Genre::Folk,
        Genre::Country,
        Genre::Reggae,
        Genre::Blues,
    ];

    /// Name used inside the model prompt.
    pub fn name(self) -> &'static str {
        match self {
            Genre::Pop => "Pop",
            Genre::Rock => "Rock",
            Genre::HipHop => "Hip-Hop",
            Genre::Classical => "Classical",
            Genre::Jazz => "Jazz",
            Genre::Electronic => "Electronic",
            Genre::Folk => "Folk",
            Genre::Country => "Country",
            Genre::Reggae => "Reggae",
            Genre::Blues => "Blues",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Genre::Pop => "🎤",
            Genre::Rock => "🎸",
            Genre::HipHop => "🎧",
            Genre::Classical => "🎻",
            Genre::Jazz => "🎷",
            Genre::Electronic => "🎹",
            Genre::Folk => "🪕",
            Genre::Country => "🤠",
            Genre::Reggae => "🌴",
            Genre::Blues => "🎺",
        }
    }

    /// Label shown in the genre picker, e.g. `🎸 Rock`.
    pub fn label(self) -> String {
        format!("{} {}", self.icon(), self.name())
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Genre {
    type Err = Error;

    /// Accepts the plain name (any case) or the picker label.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Genre::ALL
            .into_iter()
            .find(|g| g.name().eq_ignore_ascii_case(s) || g.label() == s)
            .ok_or_else(|| Error::UnknownGenre(s.to_string()))
    }
}

/// Build the text prompt handed to the model.
pub fn build_prompt(lyrics: &str, genre: Genre) -> String {
    format!("Lyrics: {}\nGenre: {}", lyrics.trim(), genre)
}

/// Check a requested duration against the slider's range and step.
pub fn validate_duration(duration_secs: u32) -> Result<u32> {
    let in_range = (MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration_secs);
    if in_range && duration_secs % DURATION_STEP_SECS == 0 {
        Ok(duration_secs)
    } else {
        Err(Error::InvalidDuration(duration_secs.to_string()))
    }
}

/// All durations the slider can take.
pub fn duration_choices() -> impl Iterator<Item = u32> {
    (MIN_DURATION_SECS..=MAX_DURATION_SECS).step_by(DURATION_STEP_SECS as usize)
}

/// A validated request for one song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRequest {
    lyrics: String,
    genre: Genre,
    duration_secs: u32,
}

#[derive(Serialize)]
struct Preview<'a> {
    #[serde(rename = "Lyrics")]
    lyrics: &'a str,
    #[serde(rename = "Genre")]
    genre: Genre,
    #[serde(rename = "Duration")]
    duration: u32,
}

impl SongRequest {
    pub fn new(lyrics: &str, genre: Genre, duration_secs: u32) -> Result<Self> {
        let lyrics = lyrics.trim();
        if lyrics.is_empty() {
            return Err(Error::EmptyLyrics);
        }
        Ok(Self {
            lyrics: lyrics.to_string(),
            genre,
            duration_secs: validate_duration(duration_secs)?,
        })
    }

    pub fn lyrics(&self) -> &str {
        &self.lyrics
    }

    pub fn genre(&self) -> Genre {
        self.genre
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    pub fn prompt(&self) -> String {
        build_prompt(&self.lyrics, self.genre)
    }

    /// Pretty JSON summary shown to the user before generation starts.
    pub fn preview_json(&self) -> String {
        let preview = Preview {
            lyrics: &self.lyrics,
            genre: self.genre,
            duration: self.duration_secs,
        };
        serde_json::to_string_pretty(&preview).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_trims_lyrics() {
        let prompt = build_prompt("  la la land \n", Genre::HipHop);
        assert_eq!(prompt, "Lyrics: la la land\nGenre: Hip-Hop");
    }

    #[test]
    fn test_genre_parses_name_and_label() {
        assert_eq!("jazz".parse::<Genre>().unwrap(), Genre::Jazz);
        assert_eq!("Hip-Hop".parse::<Genre>().unwrap(), Genre::HipHop);
        assert_eq!("🪕 Folk".parse::<Genre>().unwrap(), Genre::Folk);
        assert!("Polka".parse::<Genre>().is_err());
    }

    #[test]
    fn test_labels_are_unique() {
        let mut labels: Vec<String> = Genre::ALL.iter().map(|g| g.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), Genre::ALL.len());
    }

    #[test]
    fn test_empty_lyrics_rejected() {
        let err = SongRequest::new("   \n\t", Genre::Pop, 60).unwrap_err();
        assert!(matches!(err, Error::EmptyLyrics));
    }

    #[test]
    fn test_duration_bounds_and_step() {
        assert!(validate_duration(30).is_ok());
        assert!(validate_duration(180).is_ok());
        assert!(validate_duration(0).is_err());
        assert!(validate_duration(45).is_err());
        assert!(validate_duration(210).is_err());
        assert_eq!(
            duration_choices().collect::<Vec<_>>(),
            vec![30, 60, 90, 120, 150, 180]
        );
    }

    #[test]
    fn test_preview_json_keys() {
        let request = SongRequest::new(" hello\nworld ", Genre::Blues, 90).unwrap();
        let value: serde_json::Value = serde_json::from_str(&request.preview_json()).unwrap();
        assert_eq!(value["Lyrics"], "hello\nworld");
        assert_eq!(value["Genre"], "Blues");
        assert_eq!(value["Duration"], 90);
    }
}
