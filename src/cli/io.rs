//! JSON I/O handling for CLI
//!
//! - Input: a pipeline file, or stdin when the path is `-`
//! - Output: a single JSON object on stdout
//! - UTF-8 only

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use serde_json::Value;

use super::errors::{CliError, CliResult};

/// Read a JSON pipeline from `path`, or from stdin when `path` is `-`
pub fn read_pipeline(path: &Path) -> CliResult<Value> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        io::stdin().lock().read_to_string(&mut text)?;
        text
    } else {
        fs::read_to_string(path)
            .map_err(|e| CliError::io_error(format!("cannot read {}: {}", path.display(), e)))?
    };

    if text.trim().is_empty() {
        return Err(CliError::io_error("Empty pipeline"));
    }

    let value: Value = serde_json::from_str(&text)?;
    Ok(value)
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });

    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, &response)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    });

    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, &response)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}

/// Write plain text to stdout
pub fn write_text(text: &str) -> CliResult<()> {
    let mut stdout = io::stdout();
    writeln!(stdout, "{}", text)?;
    stdout.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_pipeline_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"$limit": 1}}]"#).unwrap();
        let value = read_pipeline(file.path()).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_pipeline(Path::new("/nonexistent/pipeline.json")).unwrap_err();
        assert_eq!(err.code_str(), "STRATUS_CLI_IO_ERROR");
    }

    #[test]
    fn test_read_empty_file() {
        let file = NamedTempFile::new().unwrap();
        assert!(read_pipeline(file.path()).is_err());
    }
}
