use super::ParseError;
use crate::model::ProcessRecord;
use std::str::FromStr;

/// Leading columns of `ps aux`; everything from COMMAND on is the command line
const FIELD_COUNT: usize = 11;

const USER: usize = 0;
const PID: usize = 1;
const CPU: usize = 2;
const MEM: usize = 3;
const VSZ: usize = 4;
const RSS: usize = 5;
const TTY: usize = 6;
const STAT: usize = 7;
const START: usize = 8;
const TIME: usize = 9;
const COMMAND: usize = 10;

pub fn parse(content: &str) -> Result<Vec<ProcessRecord>, ParseError> {
    let mut lines = content
        .trim()
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((header_line, header)) = lines.next() else {
        return Err(ParseError::format(1, "empty listing"));
    };

    if !header.trim_start().starts_with("USER") {
        return Err(ParseError::format(header_line, "header must start with USER"));
    }

    let records = lines
        .map(|(line_no, line)| parse_line(line_no, line))
        .collect::<Result<Vec<_>, _>>()?;

    if records.is_empty() {
        return Err(ParseError::format(header_line, "no process lines after header"));
    }

    Ok(records)
}

fn parse_line(line_no: usize, line: &str) -> Result<ProcessRecord, ParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < FIELD_COUNT {
        return Err(ParseError::format(
            line_no,
            format!("expected {} fields, found {}", FIELD_COUNT, fields.len()),
        ));
    }

    Ok(ProcessRecord {
        command: fields[COMMAND..].join(" "),
        pid: number(line_no, "PID", fields[PID])?,
        vsz: number(line_no, "VSZ", fields[VSZ])?,
        rss: number(line_no, "RSS", fields[RSS])?,
        cpu_usage: number(line_no, "%CPU", fields[CPU])?,
        mem_usage: number(line_no, "%MEM", fields[MEM])?,
        tty: fields[TTY].to_string(),
        stat: fields[STAT].to_string(),
        start_time: fields[START].to_string(),
        duration: fields[TIME].to_string(),
        user: fields[USER].to_string(),
        timestamp: None,
        machine_name: String::new(),
        machine_id: String::new(),
        os_type: String::new(),
    })
}

fn number<T: FromStr>(line_no: usize, column: &str, value: &str) -> Result<T, ParseError> {
    value
        .parse()
        .map_err(|_| ParseError::format(line_no, format!("invalid {} value '{}'", column, value)))
}
