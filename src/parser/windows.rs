use super::ParseError;
use crate::model::{ProcessRecord, NOT_AVAILABLE};

const IMAGE_NAME: usize = 0;
const PID: usize = 1;
const SESSION_NAME: usize = 2;
const MEM_USAGE: usize = 4;
const COLUMN_COUNT: usize = 5;

pub fn parse(content: &str) -> Result<Vec<ProcessRecord>, ParseError> {
    let lines: Vec<&str> = content.lines().collect();

    let separator_idx = lines
        .iter()
        .position(|line| line.trim().starts_with('='))
        .ok_or_else(|| ParseError::format(1, "missing '=' column separator line"))?;

    let columns = column_starts(lines[separator_idx]);
    if columns.len() < COLUMN_COUNT {
        return Err(ParseError::format(
            separator_idx + 1,
            format!("expected {} columns, found {}", COLUMN_COUNT, columns.len()),
        ));
    }

    lines
        .iter()
        .enumerate()
        .skip(separator_idx + 1)
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| parse_line(idx + 1, line, &columns))
        .collect()
}

/// Char offsets where each run of '=' begins
fn column_starts(separator: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut prev = None;
    for (pos, ch) in separator.chars().enumerate() {
        if ch == '=' && prev != Some('=') {
            starts.push(pos);
        }
        prev = Some(ch);
    }
    starts
}

fn parse_line(line_no: usize, line: &str, columns: &[usize]) -> Result<ProcessRecord, ParseError> {
    let chars: Vec<char> = line.chars().collect();
    let slice = |start: usize, end: usize| -> String {
        let start = start.min(chars.len());
        let end = end.min(chars.len());
        chars[start..end].iter().collect()
    };

    let mut fields: Vec<String> = columns
        .windows(2)
        .map(|w| slice(w[0], w[1]).trim().to_string())
        .collect();
    let last = columns[columns.len() - 1];
    fields.push(
        slice(last, chars.len())
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string(),
    );

    let pid = fields[PID].parse::<i64>().map_err(|_| {
        ParseError::format(line_no, format!("invalid PID value '{}'", fields[PID]))
    })?;

    Ok(ProcessRecord {
        command: fields[IMAGE_NAME].clone(),
        pid,
        vsz: 0,
        rss: 0,
        cpu_usage: 0.0,
        mem_usage: parse_mem_usage(&fields[MEM_USAGE]),
        tty: fields[SESSION_NAME].clone(),
        stat: NOT_AVAILABLE.to_string(),
        start_time: NOT_AVAILABLE.to_string(),
        duration: NOT_AVAILABLE.to_string(),
        user: NOT_AVAILABLE.to_string(),
        timestamp: None,
        machine_name: String::new(),
        machine_id: String::new(),
        os_type: String::new(),
    })
}

/// `12,345` or `12,345K` -> 12345.0; anything unparseable (N/A) -> 0.0
fn parse_mem_usage(value: &str) -> f64 {
    value
        .replace([',', 'K'], "")
        .parse()
        .unwrap_or(0.0)
}
