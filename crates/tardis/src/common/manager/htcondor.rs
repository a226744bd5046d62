use std::fmt::Write;
use std::str::Lines;

use crate::Map;

/// Value of a ClassAd attribute that is not defined for a given ad.
pub const UNDEFINED: &str = "undefined";

/// Replaces `undefined` by a missing value.
pub const UNDEFINED_AS_NONE: &[(&str, Option<&str>)] = &[(UNDEFINED, None)];

/// Formats command line options, e.g. `[("pool", Some("x")), ("test", None)]` becomes
/// `-pool x -test`. Options are emitted in iteration order.
pub fn format_options<'a, I>(options: I) -> String
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let mut result = String::new();
    for (key, value) in options {
        if !result.is_empty() {
            result.push(' ');
        }
        match value {
            Some(value) => write!(result, "-{key} {value}").unwrap(),
            None => write!(result, "-{key}").unwrap(),
        }
    }
    result
}

pub type Record<'a> = Map<&'a str, Option<&'a str>>;

/// Lazily parses tab delimited output of `condor_q -af:t` and `condor_status -af:t`.
///
/// Each non-empty line becomes one record, its fields are matched positionally to
/// `field_names`. Fields equal to a key of `replacements` take the mapped value.
pub fn parse_records<'a>(
    text: &'a str,
    field_names: &'a [&'a str],
    replacements: &'a [(&'a str, Option<&'a str>)],
) -> RecordParser<'a> {
    RecordParser {
        lines: text.lines(),
        field_names,
        replacements,
    }
}

pub struct RecordParser<'a> {
    lines: Lines<'a>,
    field_names: &'a [&'a str],
    replacements: &'a [(&'a str, Option<&'a str>)],
}

impl<'a> RecordParser<'a> {
    fn replace(&self, value: &'a str) -> Option<&'a str> {
        self.replacements
            .iter()
            .find(|(token, _)| *token == value)
            .map_or(Some(value), |(_, replacement)| *replacement)
    }
}

impl<'a> Iterator for RecordParser<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.by_ref().find(|line| !line.trim().is_empty())?;
        let mut record =
            Record::with_capacity_and_hasher(self.field_names.len(), Default::default());
        for (&name, value) in self.field_names.iter().zip(line.split('\t')) {
            record.insert(name, self.replace(value.trim()));
        }
        Some(record)
    }
}

/// Finds the cluster id in the output of `condor_submit`, i.e. the last word of the line
/// `1 job(s) submitted to cluster 1351043.`
pub fn parse_submit_job_id(output: &str) -> Option<&str> {
    output
        .lines()
        .map(|line| line.trim())
        .find(|line| line.contains("submitted to cluster"))
        .and_then(|line| line.trim_end_matches('.').rsplit(' ').next())
        .filter(|id| !id.is_empty())
}

/// Quotes a ClassAd expression so that it is passed to HTCondor as a single argument.
pub fn quote_argument(value: &str) -> String {
    let is_safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c);
    if !value.is_empty() && value.chars().all(is_safe) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}
