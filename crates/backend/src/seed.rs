use matjip_shared::models::{Point, RawPoint};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Aggregate files that duplicate the per-region ones.
const SKIP_FILES: [&str; 2] = ["restaurants.json", "restaurants-all.json"];

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Load every region file in `dir`.
///
/// Each `*.json` file holds an array of raw records; the file stem becomes the
/// region label. Files are read in name order, records without usable
/// coordinates are skipped, and the first occurrence of an identity key wins.
pub fn load_region_dir(dir: &Path) -> Result<Vec<Point>, SeedError> {
    let entries = std::fs::read_dir(dir).map_err(|source| SeedError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| SeedError::Read {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.extension().is_some_and(|ext| ext == "json") && !SKIP_FILES.contains(&file_name) {
            files.push(path);
        }
    }
    files.sort();

    let mut seen = HashSet::new();
    let mut points = Vec::new();
    for path in files {
        let region = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string);
        let raw = load_region_file(&path)?;
        let total = raw.len();
        let mut skipped = 0;
        let mut duplicates = 0;

        for record in raw {
            let name = record.name.clone();
            let Some(point) = record.into_point(region.clone()) else {
                tracing::warn!(
                    file = %path.display(),
                    name = %name,
                    "Skipping record without coordinates"
                );
                skipped += 1;
                continue;
            };
            if !seen.insert(point.key()) {
                duplicates += 1;
                continue;
            }
            points.push(point);
        }

        tracing::info!(
            file = %path.display(),
            total,
            skipped,
            duplicates,
            "Loaded region file"
        );
    }

    Ok(points)
}

fn load_region_file(path: &Path) -> Result<Vec<RawPoint>, SeedError> {
    let data = std::fs::read_to_string(path).map_err(|source| SeedError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| SeedError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_region_label_from_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "gangnam.json",
            r#"[{"name":"역삼맛집","address":"역삼동","lat":37.5013,"lng":127.0396,"categories":["한식"]}]"#,
        );

        let points = load_region_dir(dir.path()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].region.as_deref(), Some("gangnam"));
        assert_eq!(points[0].categories, vec!["한식"]);
        assert_eq!(points[0].link, "");
    }

    #[test]
    fn test_skips_records_without_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "mapo.json",
            r#"[
                {"name":"a","address":"x","lat":37.55,"lng":126.91},
                {"name":"b","address":"x"},
                {"name":"c","address":"x","lat":0,"lng":126.9},
                {"name":"d","address":"x","lat":37.55}
            ]"#,
        );

        let points = load_region_dir(dir.path()).unwrap();
        let names: Vec<_> = points.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn test_dedupes_across_files_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let record = r#"[{"name":"same","address":"x","lat":37.5,"lng":127.0}]"#;
        write(dir.path(), "b-region.json", record);
        write(dir.path(), "a-region.json", record);

        let points = load_region_dir(dir.path()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].region.as_deref(), Some("a-region"));
    }

    #[test]
    fn test_skips_aggregate_and_non_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let record = r#"[{"name":"p","address":"x","lat":37.5,"lng":127.0}]"#;
        write(dir.path(), "restaurants.json", record);
        write(dir.path(), "restaurants-all.json", record);
        write(dir.path(), "notes.txt", "not json");

        assert!(load_region_dir(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.json", "{ nope");

        let err = load_region_dir(dir.path()).unwrap_err();
        assert!(matches!(err, SeedError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_missing_dir_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_region_dir(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, SeedError::Read { .. }));
    }
}
