use std::path::Path;

use crate::error::{RunnerError, RunnerResult};

/// Parse a command-list file: one command per line, blank lines and `#`
/// comments skipped.
pub fn parse(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

pub async fn load(path: &Path) -> RunnerResult<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RunnerError::Input(format!("read {}: {e}", path.display())))?;
    Ok(parse(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_lines_and_comments() {
        let content = "# hosts\nping -c1 a.example\n\n   \n  ping -c1 b.example  \n#ping -c1 c.example\n";
        assert_eq!(parse(content), ["ping -c1 a.example", "ping -c1 b.example"]);
    }

    #[test]
    fn empty_content() {
        assert!(parse("").is_empty());
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.txt");
        tokio::fs::write(&path, "echo one\necho two\n").await.unwrap();
        assert_eq!(load(&path).await.unwrap(), ["echo one", "echo two"]);
    }

    #[tokio::test]
    async fn missing_file() {
        let err = load(Path::new("/nonexistent/commands.txt")).await.unwrap_err();
        assert!(matches!(err, RunnerError::Input(_)));
    }
}
