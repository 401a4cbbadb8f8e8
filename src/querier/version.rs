use std::cmp::Ordering;

/// Compare dot-separated integer versions component by component.
///
/// When one version is a prefix of the other, the longer one is greater.
/// Non-numeric components compare as `0`.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.').map(component);
    let mut right = b.split('.').map(component);
    loop {
        match (left.next(), right.next()) {
            (Some(l), Some(r)) => match l.cmp(&r) {
                Ordering::Equal => continue,
                other => return other,
            },
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => return Ordering::Equal,
        }
    }
}

fn component(part: &str) -> u64 {
    part.trim().parse().unwrap_or(0)
}

/// Greatest version present in both lists, if any.
#[must_use]
pub fn largest_common_version<'a, S: AsRef<str>>(server: &'a [S], client: &[&str]) -> Option<&'a str> {
    server
        .iter()
        .map(|v| AsRef::<str>::as_ref(v))
        .filter(|v| client.contains(v))
        .max_by(|a, b| compare_versions(a, b))
}
