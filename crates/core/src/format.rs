use crate::types::{FinderStats, Playlist, SearchOutcome, Video};

/// First `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Shorten `text` to `max` characters, marking the cut with "...".
pub fn ellipsize(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}...", truncate_chars(text, max))
    }
}

pub fn format_results_readable(video: &Video, playlists: &[Playlist]) -> String {
    let mut output = String::new();
    output.push_str(&format!("# {}\n\n", video.title));
    output.push_str(&format!(
        "**Channel:** {} | **Views:** {} | **URL:** {}\n\n",
        video.channel_title,
        video.view_count,
        video.url()
    ));

    if playlists.is_empty() {
        output.push_str("No playlists found containing this video.\n");
        return output;
    }

    output.push_str(&format!("## Found in {} playlists\n\n", playlists.len()));
    for (i, playlist) in playlists.iter().enumerate() {
        output.push_str(&format!("{}. {}\n", i + 1, ellipsize(&playlist.title, 40)));
        output.push_str(&format!(
            "   Channel: {} | Videos: {}\n",
            playlist.channel_title, playlist.item_count
        ));
        output.push_str(&format!("   {}\n", playlist.url));
    }

    output
}

pub fn format_outcome_summary(outcome: &SearchOutcome) -> String {
    let mut output = String::new();
    for report in &outcome.strategies {
        match &report.error {
            None => output.push_str(&format!(
                "  {:<18} {} candidates\n",
                report.strategy.as_str(),
                report.candidates
            )),
            Some(error) => output.push_str(&format!(
                "  {:<18} failed: {}\n",
                report.strategy.as_str(),
                error
            )),
        }
    }
    output.push_str(&format!(
        "  checked {} playlists, {}\n",
        outcome.candidates_checked,
        outcome.status.describe()
    ));
    output
}

pub fn format_stats(stats: &FinderStats) -> String {
    format!(
        "API quota used:    {}\n\
         API calls:         {}\n\
         Playlists checked: {}\n\
         Playlists found:   {}\n\
         Cache hit rate:    {:.1}%\n\
         Cache entries:     {}\n",
        stats.quota_used,
        stats.api_calls,
        stats.playlists_checked,
        stats.playlists_found,
        stats.cache.hit_rate,
        stats.cache.entries
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ellipsize_counts_characters_not_bytes() {
        assert_eq!(ellipsize("short", 40), "short");
        assert_eq!(ellipsize("ÄÖÜäöü", 3), "ÄÖÜ...");
        assert_eq!(truncate_chars("ÄÖÜäöü", 4), "ÄÖÜä");
    }
}
