//! Batch splitting for SQL scripts
//!
//! A script is cut into independently executable batches on separator lines
//! consisting of `GO` or `GO;` alone.

/// Whether a line is a batch separator
fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.eq_ignore_ascii_case("go") || trimmed.eq_ignore_ascii_case("go;")
}

/// Split a script into batches, dropping separators and blank batches
pub fn split_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in script.lines() {
        if is_separator(line) {
            push_batch(&mut batches, &current);
            current.clear();
        } else {
            current.push(line);
        }
    }
    push_batch(&mut batches, &current);

    batches
}

fn push_batch(batches: &mut Vec<String>, lines: &[&str]) {
    let batch = lines.join("\n");
    if !batch.trim().is_empty() {
        batches.push(batch.trim().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_without_separator_is_one_batch() {
        let batches = split_batches("CREATE TABLE a (id INT);\nCREATE TABLE b (id INT);");
        assert_eq!(batches, vec!["CREATE TABLE a (id INT);\nCREATE TABLE b (id INT);"]);
    }

    #[test]
    fn test_splits_on_go_lines() {
        let script = "CREATE TABLE a (id INT);\nGO\nCREATE TABLE b (id INT);\ngo;\n  GO  \nINSERT INTO a VALUES (1);\n";
        let batches = split_batches(script);
        assert_eq!(
            batches,
            vec![
                "CREATE TABLE a (id INT);",
                "CREATE TABLE b (id INT);",
                "INSERT INTO a VALUES (1);",
            ]
        );
    }

    #[test]
    fn test_go_inside_a_line_is_not_a_separator() {
        let script = "SELECT 'GO' AS word;\nUPDATE t SET status = 'GO';\nGOTO_TABLE";
        assert_eq!(split_batches(script).len(), 1);
    }

    #[test]
    fn test_crlf_and_blank_batches() {
        let script = "GO\r\n\r\nCREATE TABLE a (id INT);\r\nGO\r\n   \r\nGO\r\n";
        assert_eq!(split_batches(script), vec!["CREATE TABLE a (id INT);"]);
    }

    #[test]
    fn test_empty_script() {
        assert!(split_batches("").is_empty());
        assert!(split_batches("GO\nGO;").is_empty());
    }
}
