use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    error::{FinderError, Result},
    format::truncate_chars,
    types::{Playlist, Video},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Html,
    Csv,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Json, ExportFormat::Html, ExportFormat::Csv];

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Html => "html",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "html" | "htm" => Ok(ExportFormat::Html),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(FinderError::Config {
                reason: format!("unsupported export format '{}'", other),
            }),
        }
    }
}

/// Layout of a JSON export.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportDocument {
    pub video: Video,
    pub found_playlists: Vec<Playlist>,
    pub search_time: DateTime<Utc>,
    pub total_found: usize,
}

/// `<output_dir>/playlists_<video_id>_<YYYYmmdd_HHMMSS>.<ext>`
pub fn default_export_path(
    output_dir: &Path,
    video_id: &str,
    format: ExportFormat,
    now: DateTime<Local>,
) -> PathBuf {
    output_dir.join(format!(
        "playlists_{}_{}.{}",
        video_id,
        now.format("%Y%m%d_%H%M%S"),
        format.extension()
    ))
}

/// Write `playlists` for `video` to `path` in `format`.
pub async fn export_results(
    video: &Video,
    playlists: &[Playlist],
    format: ExportFormat,
    path: &Path,
) -> Result<PathBuf> {
    let contents = match format {
        ExportFormat::Json => render_json(video, playlists)?,
        ExportFormat::Csv => render_csv(playlists)?,
        ExportFormat::Html => render_html(video, playlists),
    };
    write_export(path, contents.as_bytes()).await?;
    tracing::debug!(path = %path.display(), %format, "exported results");
    Ok(path.to_path_buf())
}

/// Read back a JSON export.
pub async fn load_json_export(path: &Path) -> Result<ExportDocument> {
    let json_content = fs::read_to_string(path).await?;
    let document: ExportDocument = serde_json::from_str(&json_content)?;
    Ok(document)
}

/// Write a batch run as a JSON object mapping video id to its playlists.
pub async fn export_batch(results: &BTreeMap<String, Vec<Playlist>>, path: &Path) -> Result<()> {
    let pretty_json = serde_json::to_string_pretty(results)?;
    write_export(path, pretty_json.as_bytes()).await
}

pub fn render_json(video: &Video, playlists: &[Playlist]) -> Result<String> {
    let document = ExportDocument {
        video: video.clone(),
        found_playlists: playlists.to_vec(),
        search_time: Utc::now(),
        total_found: playlists.len(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn render_csv(playlists: &[Playlist]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "Playlist Title",
        "Channel",
        "URL",
        "Item Count",
        "Description",
        "Published",
    ])?;
    for p in playlists {
        let item_count = p.item_count.to_string();
        let description = truncate_chars(&p.description, 100);
        writer.write_record([
            p.title.as_str(),
            p.channel_title.as_str(),
            p.url.as_str(),
            item_count.as_str(),
            description.as_str(),
            p.published_at.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| FinderError::IoError(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn render_html(video: &Video, playlists: &[Playlist]) -> String {
    let mut html = String::new();
    html.push_str(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Playlist Search Results</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 20px; }
        .video-info { background: #f0f0f0; padding: 15px; border-radius: 5px; }
        .playlist { background: white; margin: 10px 0; padding: 15px; border: 1px solid #ddd; border-radius: 5px; }
        .playlist:hover { background: #f9f9f9; }
        h1 { color: #333; }
        a { color: #1a73e8; text-decoration: none; }
        a:hover { text-decoration: underline; }
        .stats { color: #666; font-size: 0.9em; }
    </style>
</head>
<body>
    <h1>Playlist Search Results</h1>
"#,
    );

    let video_url = escape_html(&video.url());
    html.push_str(&format!(
        r#"    <div class="video-info">
        <h2>Video Information</h2>
        <p><strong>Title:</strong> {}</p>
        <p><strong>Channel:</strong> {}</p>
        <p><strong>URL:</strong> <a href="{url}" target="_blank">{url}</a></p>
        <p class="stats">Views: {} | Likes: {}</p>
    </div>
    <h2>Found in {} Playlists</h2>
"#,
        escape_html(&video.title),
        escape_html(&video.channel_title),
        video.view_count,
        video.like_count,
        playlists.len(),
        url = video_url,
    ));

    for p in playlists {
        html.push_str(&format!(
            r#"    <div class="playlist">
        <h3><a href="{}" target="_blank">{}</a></h3>
        <p><strong>Channel:</strong> {}</p>
        <p><strong>Videos:</strong> {}</p>
        <p><strong>Description:</strong> {}</p>
        <p class="stats">Published: {}</p>
    </div>
"#,
            escape_html(&p.url),
            escape_html(&p.title),
            escape_html(&p.channel_title),
            p.item_count,
            escape_html(&truncate_chars(&p.description, 200)),
            escape_html(&truncate_chars(&p.published_at, 10)),
        ));
    }

    html.push_str("</body>\n</html>\n");
    html
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

async fn write_export(path: &Path, contents: &[u8]) -> Result<()> {
    let export_error = |source| FinderError::Export {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(export_error)?;
    }
    fs::write(path, contents).await.map_err(export_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn video() -> Video {
        Video {
            id: "dQw4w9WgXcQ".into(),
            title: "Never <Gonna> Give You Up".into(),
            channel_id: "UCuAXFkgsw1L7xaCfnd5JJOw".into(),
            channel_title: "Rick Astley".into(),
            description: String::new(),
            duration: "PT3M33S".into(),
            view_count: 1_000,
            like_count: 10,
            published_at: "2009-10-25T06:57:33Z".into(),
            thumbnail_url: String::new(),
            tags: vec![],
        }
    }

    fn playlist(id: &str, title: &str) -> Playlist {
        Playlist {
            id: id.into(),
            title: title.into(),
            channel_id: "UC1".into(),
            channel_title: "Someone".into(),
            description: "x".repeat(300),
            item_count: 42,
            published_at: "2020-01-02T03:04:05Z".into(),
            thumbnail_url: String::new(),
            privacy_status: "public".into(),
            contains_video: true,
            discovered_by: None,
            url: Playlist::playlist_url(id),
        }
    }

    #[tokio::test]
    async fn json_export_reads_back_same_playlists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let playlists = vec![playlist("PL1", "80s hits"), playlist("PL2", "Rickrolls, \"vol. 2\"")];

        export_results(&video(), &playlists, ExportFormat::Json, &path)
            .await
            .unwrap();
        let document = load_json_export(&path).await.unwrap();

        let written: HashSet<(String, String)> =
            playlists.iter().map(|p| (p.id.clone(), p.title.clone())).collect();
        let read: HashSet<(String, String)> = document
            .found_playlists
            .iter()
            .map(|p| (p.id.clone(), p.title.clone()))
            .collect();
        assert_eq!(written, read);
        assert_eq!(document.total_found, 2);
        assert_eq!(document.video.id, "dQw4w9WgXcQ");
    }

    #[test]
    fn csv_has_header_and_truncated_description() {
        let csv = render_csv(&[playlist("PL1", "a, b")]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Playlist Title,Channel,URL,Item Count,Description,Published"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("\"a, b\",Someone,https://www.youtube.com/playlist?list=PL1,42,"));
        assert!(row.contains(&format!(",{},", "x".repeat(100))));
        assert!(!row.contains(&"x".repeat(101)));
    }

    #[test]
    fn html_escapes_titles() {
        let html = render_html(&video(), &[playlist("PL1", "<script>")]);
        assert!(html.contains("Never &lt;Gonna&gt; Give You Up"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("Found in 1 Playlists"));
        assert!(html.contains("Published: 2020-01-02<"));
    }

    #[tokio::test]
    async fn unwritable_destination_is_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();
        let path = blocker.join("nested").join("out.csv");

        let err = export_results(&video(), &[], ExportFormat::Csv, &path)
            .await
            .unwrap_err();
        assert!(matches!(err, FinderError::Export { .. }));
    }

    #[test]
    fn default_path_uses_video_id_and_timestamp() {
        let now = Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let path = default_export_path(Path::new("results"), "abc", ExportFormat::Html, now);
        assert_eq!(path, Path::new("results/playlists_abc_20240506_070809.html"));
    }

    #[tokio::test]
    async fn batch_export_maps_video_to_playlists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        let mut results = BTreeMap::new();
        results.insert("vid1".to_string(), vec![playlist("PL1", "one")]);
        results.insert("vid2".to_string(), vec![]);

        export_batch(&results, &path).await.unwrap();
        let parsed: BTreeMap<String, Vec<Playlist>> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["vid1"][0].id, "PL1");
        assert!(parsed["vid2"].is_empty());
    }
}
