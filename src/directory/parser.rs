use std::{collections::HashSet, path::PathBuf};

const PACKAGE_PREFIX: &str = "package:";
const UID_PREFIX: &str = "uid:";

/// One row of `pm list packages -f -U`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRow {
    pub package: String,
    pub uid: u32,
    pub apk: Option<PathBuf>,
}

/// Parse `pm list packages -f -U` output into rows
///
/// Accepted formats:
/// - `package:/data/app/com.foo-1/base.apk=com.foo uid:10050`
/// - `package:com.foo uid:10050`
/// - `package:com.foo uid:10050,1010050` (multi-user, the first uid wins)
///
/// Rows that cannot be parsed are skipped with a warning. Duplicates are kept;
/// the reconciler decides which one wins.
///
/// # Examples
/// ```
/// use netwarden::directory::parse_package_list;
///
/// let lines = vec!["package:com.example.foo uid:10050".to_string()];
/// let rows = parse_package_list(&lines);
/// assert_eq!(rows[0].uid, 10050);
/// ```
pub fn parse_package_list(lines: &[String]) -> Vec<PackageRow> {
    let mut rows = Vec::with_capacity(lines.len());
    for raw in lines {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_row(trimmed) {
            Ok(row) => rows.push(row),
            Err(reason) => log::warn!("Skipping package row '{trimmed}': {reason}"),
        }
    }
    rows
}

/// Parse `pm list packages -s` output into a set of package names
pub fn parse_package_names(lines: &[String]) -> HashSet<String> {
    lines
        .iter()
        .filter_map(|line| line.trim().strip_prefix(PACKAGE_PREFIX))
        .map(|name| name.split_whitespace().next().unwrap_or(name).to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn parse_row(input: &str) -> Result<PackageRow, String> {
    let body = input
        .strip_prefix(PACKAGE_PREFIX)
        .ok_or_else(|| "missing package: prefix".to_string())?;

    let (spec, uid_part) = body
        .rsplit_once(char::is_whitespace)
        .ok_or_else(|| "missing uid".to_string())?;

    let uid_list = uid_part
        .strip_prefix(UID_PREFIX)
        .ok_or_else(|| format!("expected uid:, found '{uid_part}'"))?;
    let uid = uid_list
        .split(',')
        .next()
        .unwrap_or_default()
        .parse::<u32>()
        .map_err(|_| format!("invalid uid '{uid_list}'"))?;

    // The APK path may itself contain '=' so split on the last one
    let (apk, package) = match spec.rsplit_once('=') {
        Some((path, package)) if path.starts_with('/') => (Some(PathBuf::from(path)), package),
        _ => (None, spec),
    };

    let package = package.trim();
    if package.is_empty() {
        return Err("empty package name".to_string());
    }

    Ok(PackageRow {
        package: package.to_string(),
        uid,
        apk,
    })
}
