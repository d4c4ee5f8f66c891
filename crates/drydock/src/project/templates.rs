//! Template scaffolding for new project storage.
//!
//! A template is either a directory under the configured templates dir
//! (copied file-by-file, `.git` skipped) or one of the built-in file sets.

use std::path::Path;

use log::debug;
use tokio::fs;
use walkdir::WalkDir;

use super::error::{ProjectError, ProjectResult};

/// Built-in template file sets, used when no directory template matches.
fn builtin_files(template: &str) -> Option<&'static [(&'static str, &'static str)]> {
    match template {
        "empty" => Some(&[]),
        "node" => Some(&[
            (
                "package.json",
                "{\n  \"name\": \"workspace\",\n  \"version\": \"0.1.0\",\n  \"main\": \"index.js\"\n}\n",
            ),
            ("index.js", "console.log(\"hello from drydock\");\n"),
        ]),
        "python" => Some(&[
            ("main.py", "def main():\n    print(\"hello from drydock\")\n\n\nif __name__ == \"__main__\":\n    main()\n"),
            ("requirements.txt", ""),
        ]),
        "rust" => Some(&[
            (
                "Cargo.toml",
                "[package]\nname = \"workspace\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
            ),
            ("src/main.rs", "fn main() {\n    println!(\"hello from drydock\");\n}\n"),
        ]),
        _ => None,
    }
}

/// Names of the built-in templates.
pub fn builtin_names() -> &'static [&'static str] {
    &["empty", "node", "python", "rust"]
}

/// Materialize `template` into `dest`.
///
/// `templates_dir`, when set, takes precedence over the built-ins so
/// deployments can override them. Unknown templates fail with
/// [`ProjectError::Template`]; the caller owns rollback of `dest`.
pub async fn scaffold(
    template: &str,
    templates_dir: Option<&Path>,
    dest: &Path,
) -> ProjectResult<()> {
    if let Some(dir) = templates_dir {
        let src = dir.join(template);
        if src.is_dir() {
            debug!("Scaffolding {} from {}", template, src.display());
            return copy_template(&src, dest).await;
        }
    }

    let Some(files) = builtin_files(template) else {
        return Err(ProjectError::Template(format!(
            "unknown template '{template}'"
        )));
    };

    for (rel_path, content) in files {
        let target = dest.join(rel_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ProjectError::Template(format!("creating {}: {e}", parent.display())))?;
        }
        fs::write(&target, content)
            .await
            .map_err(|e| ProjectError::Template(format!("writing {}: {e}", target.display())))?;
    }

    Ok(())
}

/// Copy a directory template into `dest`, skipping `.git`.
async fn copy_template(src: &Path, dest: &Path) -> ProjectResult<()> {
    // Walk on the blocking pool; template trees are small but walkdir is sync.
    let src = src.to_path_buf();
    let entries = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&src) {
            let entry = entry.map_err(|e| format!("reading template entry: {e}"))?;
            let rel = entry
                .path()
                .strip_prefix(&src)
                .map_err(|e| format!("relativizing template path: {e}"))?
                .to_path_buf();
            if rel.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            files.push((entry.path().to_path_buf(), rel, entry.file_type().is_dir()));
        }
        Ok::<_, String>(files)
    })
    .await
    .map_err(|e| ProjectError::Template(format!("template walk task failed: {e}")))?
    .map_err(ProjectError::Template)?;

    for (abs, rel, is_dir) in entries {
        let target = dest.join(&rel);
        if is_dir {
            fs::create_dir_all(&target)
                .await
                .map_err(|e| ProjectError::Template(format!("creating {}: {e}", target.display())))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    ProjectError::Template(format!("creating {}: {e}", parent.display()))
                })?;
            }
            fs::copy(&abs, &target)
                .await
                .map_err(|e| ProjectError::Template(format!("copying {}: {e}", target.display())))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_scaffold_builtin_node() {
        let dir = tempdir().unwrap();
        scaffold("node", None, dir.path()).await.unwrap();
        assert!(dir.path().join("package.json").exists());
        assert!(dir.path().join("index.js").exists());
    }

    #[tokio::test]
    async fn test_scaffold_empty_writes_nothing() {
        let dir = tempdir().unwrap();
        scaffold("empty", None, dir.path()).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_scaffold_unknown_template_fails() {
        let dir = tempdir().unwrap();
        let err = scaffold("no-such-template", None, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::Template(_)));
    }

    #[tokio::test]
    async fn test_scaffold_custom_dir_skips_git() {
        let templates = tempdir().unwrap();
        let custom = templates.path().join("custom");
        std::fs::create_dir_all(custom.join(".git")).unwrap();
        std::fs::write(custom.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(custom.join("README.md"), "# custom").unwrap();

        let dest = tempdir().unwrap();
        scaffold("custom", Some(templates.path()), dest.path())
            .await
            .unwrap();
        assert!(dest.path().join("README.md").exists());
        assert!(!dest.path().join(".git").exists());
    }
}
