use std::fmt::{self, Write};

use crate::align::MergedEntry;
use crate::config::ShowProfile;

pub(crate) const SYSTEM_PROMPT: &str = "You are an expert in comedy analysis.";

/// Builds the ranking request for `profile` over the merged timeline.
pub(crate) fn build(profile: &ShowProfile, entries: &[MergedEntry]) -> Result<String, fmt::Error> {
    let num = profile.num_clips;
    let title = if profile.title.is_empty() {
        "untitled"
    } else {
        profile.title.as_str()
    };
    let mut out = String::new();

    writeln!(
        out,
        "You are an expert in comedy analysis. Your task is to review the video segments of the {}, \"{}\".",
        profile.kind, title
    )?;
    writeln!(
        out,
        "The objective is to select the {num} funniest or most entertaining moments based on the provided timestamps, audio captions, and video captions.\n"
    )?;

    if !profile.synopsis.is_empty() || !profile.elements.is_empty() {
        writeln!(out, "**Description:**")?;
        if !profile.synopsis.is_empty() {
            writeln!(out, "{}", profile.synopsis.trim())?;
        }
        if !profile.elements.is_empty() {
            writeln!(out, "Key comedic elements include:")?;
            for element in &profile.elements {
                writeln!(out, "- {element}")?;
            }
        }
        out.push('\n');
    }

    if !profile.characteristics.is_empty() {
        writeln!(out, "***Characteristics of Humorous Scenes:***")?;
        for (i, item) in profile.characteristics.iter().enumerate() {
            writeln!(out, "{}. {item}", i + 1)?;
        }
        out.push('\n');
    }

    let objective = profile.objective.clone().unwrap_or_else(|| {
        format!("Identify the {num} funniest segments with start and end timestamps for YouTube Shorts")
    });
    writeln!(out, "***Objective:*** {objective}\n")?;

    writeln!(out, "***Instructions:***")?;
    writeln!(out, "- Review each segment's timestamp, video caption, and audio caption.")?;
    writeln!(out, "- The data is presented in chronological order; consider the context from previous and following segments.")?;
    writeln!(out, "- Choose segments spread out across the {} so the funniest moments aren't clustered together.", profile.kind)?;
    writeln!(
        out,
        "- Each segment must last at most {} seconds, start and end at natural scene transitions, and contain a complete comedic moment.",
        profile.max_clip_secs
    )?;
    writeln!(out, "- Rank the top {num} segments by humor, funniest first, and give both start and end timestamps in HH:MM:SS form. Also list only the start timestamps separately.")?;
    if profile.with_titles {
        writeln!(out, "- For each segment, create a short and catchy YouTube Shorts title capturing the essence of the clip.")?;
    } else {
        writeln!(out, "- Do not include descriptions or explanations, only the timestamps.")?;
    }
    out.push('\n');

    if profile.with_titles && !profile.title_examples.is_empty() {
        writeln!(out, "***Examples of YouTube Shorts Titles:***")?;
        for example in &profile.title_examples {
            writeln!(out, "- \"{example}\"")?;
        }
        out.push('\n');
    }

    writeln!(out, "***Video Segments:***")?;
    for entry in entries {
        writeln!(
            out,
            "Timestamp: {}\nVideo Caption: {}\nAudio Caption: {}\n",
            entry.time,
            entry.video_captions.join("; "),
            entry.audio_caption.trim()
        )?;
    }

    let example = if profile.with_titles {
        r#"["00:02:30", "00:03:30", "Title for Clip #1"],
        ["00:05:15", "00:06:15", "Title for Clip #2"],"#
    } else {
        r#"["00:02:30", "00:03:30"],
        ["00:05:15", "00:06:15"],"#
    };
    write!(
        out,
        r#"***Output Format (JSON):***
Respond strictly with a JSON object of this shape:
{{
    "funniest_timestamps_full": [
        {example}
        ... ({num} entries in total)
    ],
    "funniest_start_timestamps_only": [
        "00:02:30",
        "00:05:15",
        ... ({num} timestamps in total)
    ]
}}
"#
    )?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;

    fn entries() -> Vec<MergedEntry> {
        vec![
            MergedEntry {
                time: Timestamp::parse("12.6").unwrap(),
                audio_caption: " Keep the change, ya filthy animal.".to_owned(),
                video_captions: vec!["a boy in a hallway".to_owned(), "a tv screen".to_owned()],
            },
            MergedEntry {
                time: Timestamp::parse("01:05:00").unwrap(),
                audio_caption: "Ahh!".to_owned(),
                video_captions: vec![],
            },
        ]
    }

    #[test]
    fn lists_every_segment_in_canonical_time() {
        let prompt = build(&ShowProfile::default(), &entries()).unwrap();
        assert!(prompt.contains("Timestamp: 00:00:12\nVideo Caption: a boy in a hallway; a tv screen\nAudio Caption: Keep the change, ya filthy animal."));
        assert!(prompt.contains("Timestamp: 01:05:00\nVideo Caption: \nAudio Caption: Ahh!"));
        let first = prompt.find("00:00:12").unwrap();
        let second = prompt.find("01:05:00").unwrap();
        assert!(first < second);
    }

    #[test]
    fn carries_profile_fields() {
        let profile = ShowProfile {
            title: "Home Alone".to_owned(),
            kind: "movie".to_owned(),
            synopsis: "A boy defends his house.".to_owned(),
            elements: vec!["Slapstick".to_owned()],
            title_examples: vec!["Epic Slip on the Ice Stairs!".to_owned()],
            num_clips: 3,
            max_clip_secs: 45,
            ..ShowProfile::default()
        };
        let prompt = build(&profile, &entries()).unwrap();
        assert!(prompt.contains("the movie, \"Home Alone\""));
        assert!(prompt.contains("select the 3 funniest"));
        assert!(prompt.contains("(3 entries in total)"));
        assert!(prompt.contains("at most 45 seconds"));
        assert!(prompt.contains("A boy defends his house."));
        assert!(prompt.contains("- Slapstick"));
        assert!(prompt.contains("1. Exaggerated Reactions"));
        assert!(prompt.contains("Epic Slip on the Ice Stairs!"));
        assert!(prompt.contains("Title for Clip #1"));
    }

    #[test]
    fn untitled_profile_asks_for_pairs_only() {
        let profile = ShowProfile {
            with_titles: false,
            title_examples: vec!["never shown".to_owned()],
            objective: Some("Find slapstick".to_owned()),
            ..ShowProfile::default()
        };
        let prompt = build(&profile, &[]).unwrap();
        assert!(!prompt.contains("Title for Clip"));
        assert!(!prompt.contains("never shown"));
        assert!(prompt.contains("***Objective:*** Find slapstick"));
        assert!(prompt.contains("\"untitled\""));
        assert!(prompt.contains("funniest_start_timestamps_only"));
    }
}
