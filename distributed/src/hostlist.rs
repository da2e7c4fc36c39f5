//! Expansion of Slurm's compressed host lists (`gpu[01-03,07],login1`).

/// Refuse to materialize lists bigger than this.
const MAX_HOSTS: usize = 1 << 16;

/// Expands a compressed host list into individual host names, in order.
///
/// Returns `None` when the list is malformed: empty entries, unbalanced or nested
/// brackets, non numeric ranges or descending ranges.
pub fn expand(list: &str) -> Option<Vec<String>> {
    let mut hosts = Vec::new();

    for item in split_top_level(list)? {
        hosts.extend(expand_item(item)?);
        if hosts.len() > MAX_HOSTS {
            return None;
        }
    }

    (!hosts.is_empty()).then_some(hosts)
}

/// Returns the first host of a compressed host list.
pub fn first_host(list: &str) -> Option<String> {
    let item = split_top_level(list)?.into_iter().next()?;
    expand_item(item)?.into_iter().next()
}

fn split_top_level(list: &str) -> Option<Vec<&str>> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in list.char_indices() {
        match c {
            '[' if depth == 0 => depth = 1,
            '[' => return None,
            ']' if depth == 1 => depth = 0,
            ']' => return None,
            ',' if depth == 0 => {
                items.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return None;
    }

    items.push(&list[start..]);
    let items: Vec<_> = items.into_iter().map(str::trim).collect();
    items.iter().all(|item| !item.is_empty()).then_some(items)
}

fn expand_item(item: &str) -> Option<Vec<String>> {
    let Some(open) = item.find('[') else {
        return (!item.contains(']')).then(|| vec![item.to_string()]);
    };

    let close = open + item[open..].find(']')?;
    let prefix = &item[..open];
    let body = &item[open + 1..close];
    let rest = expand_item(&item[close + 1..])?;

    let mut hosts = Vec::new();
    for number in expand_ranges(body)? {
        for suffix in &rest {
            hosts.push(format!("{prefix}{number}{suffix}"));
            if hosts.len() > MAX_HOSTS {
                return None;
            }
        }
    }

    Some(hosts)
}

fn expand_ranges(body: &str) -> Option<Vec<String>> {
    let mut numbers = Vec::new();

    for range in body.split(',') {
        let (lo, hi) = range.split_once('-').unwrap_or((range, range));
        if !is_number(lo) || !is_number(hi) {
            return None;
        }

        let width = lo.len();
        let (lo, hi): (u64, u64) = (lo.parse().ok()?, hi.parse().ok()?);
        if lo > hi || (hi - lo) as usize > MAX_HOSTS {
            return None;
        }

        numbers.extend((lo..=hi).map(|n| format!("{n:0width$}")));
    }

    Some(numbers)
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
