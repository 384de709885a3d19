//! Provider index loading

use std::path::Path;

use csv::ReaderBuilder;
use rusqlite::Connection;
use tracing::debug;

use super::Clip;
use crate::DataError;

const CLIP_QUERY: &str =
    "SELECT mission_id, stream_id, uri, first_time, last_time FROM clips ORDER BY first_time";

/// Read all clips listed by a provider file
pub(super) fn load(path: &Path) -> Result<Vec<Clip>, DataError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let clips = match extension.as_str() {
        "csv" => load_csv(path)?,
        "db" | "sqlite" | "sqlite3" => load_sqlite(path)?,
        other => {
            return Err(DataError::Config(format!(
                "Unsupported video provider type '{}' for {}",
                other,
                path.display()
            )))
        }
    };

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(clips
        .into_iter()
        .map(|mut clip| {
            clip.uri = absolute_uri(&clip.uri, base);
            clip
        })
        .collect())
}

fn load_csv(path: &Path) -> Result<Vec<Clip>, DataError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)?;

    let mut clips = Vec::new();
    for result in reader.deserialize() {
        let clip: Clip = result?;
        clips.push(clip);
    }
    debug!(provider = %path.display(), clips = clips.len(), "Read CSV provider");
    Ok(clips)
}

fn load_sqlite(path: &Path) -> Result<Vec<Clip>, DataError> {
    let conn = Connection::open(path)?;
    let mut stmt = conn.prepare(CLIP_QUERY)?;
    let rows = stmt.query_map([], |row| {
        Ok(Clip {
            mission_id: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            stream_id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            uri: row.get(2)?,
            first_time: row.get(3)?,
            last_time: row.get(4)?,
        })
    })?;

    let mut clips = Vec::new();
    for row in rows {
        clips.push(row?);
    }
    debug!(provider = %path.display(), clips = clips.len(), "Read SQLite provider");
    Ok(clips)
}

/// Resolve a relative clip path against the provider's directory
fn absolute_uri(uri: &str, base: &Path) -> String {
    if uri.contains("://") {
        return uri.to_string();
    }
    let path = Path::new(uri);
    if path.is_absolute() {
        format!("file://{}", uri)
    } else {
        format!("file://{}", base.join(path).display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_csv_provider() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clips.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "mission_id,stream_id,uri,first_time,last_time").unwrap();
        writeln!(file, ",s1,video/a.csv,0,100").unwrap();
        writeln!(file, "m1,s2,file:///abs/b.csv,5,50").unwrap();

        let clips = load(&path).unwrap();
        assert_eq!(clips.len(), 2);
        assert_eq!(
            clips[0].uri,
            format!("file://{}", dir.path().join("video/a.csv").display())
        );
        assert_eq!(clips[1].uri, "file:///abs/b.csv");
        assert_eq!(clips[1].mission_id, "m1");
    }

    #[test]
    fn test_load_sqlite_provider() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clips.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE clips (mission_id TEXT, stream_id TEXT, uri TEXT NOT NULL,
                                 first_time INTEGER NOT NULL, last_time INTEGER NOT NULL);
             INSERT INTO clips VALUES (NULL, 's1', '/videos/x.csv', 200, 300);
             INSERT INTO clips VALUES ('m', NULL, '/videos/y.csv', 0, 100);",
        )
        .unwrap();
        drop(conn);

        let clips = load(&path).unwrap();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].uri, "file:///videos/y.csv");
        assert_eq!(clips[0].stream_id, "");
        assert_eq!(clips[1].mission_id, "");
    }

    #[test]
    fn test_unknown_provider_type() {
        assert!(matches!(
            load(Path::new("providers.xml")),
            Err(DataError::Config(_))
        ));
    }
}
