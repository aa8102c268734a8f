use std::collections::HashSet;
use std::path::Path;

use walkdir::WalkDir;

use crate::types::DiscoveredFile;

/// Walks `<data_dir>/projects` and discovers every `.jsonl` session file,
/// classified as main session or subagent. Unreadable entries are skipped
/// silently; a missing projects directory yields an empty set.
pub fn scan_dir(data_dir: &Path) -> std::io::Result<Vec<DiscoveredFile>> {
    let projects_dir = data_dir.join("projects");
    if !projects_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(&projects_dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
            continue;
        }

        let Ok(rel) = path.strip_prefix(&projects_dir) else {
            continue;
        };
        let parts: Vec<&str> = rel
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        if parts.len() < 2 {
            continue;
        }

        let project_dir = parts[0];
        let file_stem = Path::new(parts[parts.len() - 1])
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();

        // Subagent layout: <project>/<parent-uuid>/subagents/agent-<id>.jsonl
        let (session_id, is_subagent, parent_session) =
            if parts.len() >= 4 && parts[2] == "subagents" {
                (
                    format!("{}/{}", parts[1], file_stem),
                    true,
                    Some(parts[1].to_string()),
                )
            } else {
                (file_stem.to_string(), false, None)
            };

        files.push(DiscoveredFile {
            path: path.to_path_buf(),
            project: decode_project_name(project_dir),
            project_dir: project_dir.to_string(),
            session_id,
            is_subagent,
            parent_session,
        });
    }

    Ok(files)
}

/// Number of distinct projects in a discovered set.
pub fn count_projects(files: &[DiscoveredFile]) -> usize {
    files
        .iter()
        .map(|f| f.project.as_str())
        .collect::<HashSet<_>>()
        .len()
}

const KNOWN_PARENTS: &[&str] = &["projects", "repos", "src", "code", "workspace", "dev"];

/// Extracts a readable project name from the encoded directory name. The
/// encoding replaces `/` with `-`, so:
///
///   "-Users-taylor-projects-gitlore"        -> "gitlore"
///   "-Users-taylor-projects-my-cool-thing"  -> "my-cool-thing"
///
/// Scans right to left for the last known parent marker and joins everything
/// after it. Falls back to the last non-empty segment, then the raw name.
fn decode_project_name(dir_name: &str) -> String {
    let parts: Vec<&str> = dir_name.split('-').collect();

    for i in (0..parts.len().saturating_sub(1)).rev() {
        if KNOWN_PARENTS
            .iter()
            .any(|parent| parts[i].eq_ignore_ascii_case(parent))
        {
            let name = parts[i + 1..].join("-");
            if !name.is_empty() {
                return name;
            }
        }
    }

    for part in parts.iter().rev() {
        if !part.is_empty() {
            return (*part).to_string();
        }
    }

    dir_name.to_string()
}
