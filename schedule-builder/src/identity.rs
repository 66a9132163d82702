use crate::structs::Timestamp;

/// Derives the id shared by an [`Event`](crate::Event) and the container it
/// was scraped from.
///
/// Both sides must go through this function, otherwise stored selections no
/// longer match the page.
#[must_use]
pub fn make_id(start: &Timestamp, summary: &str, positional_index: usize) -> String {
    let summary: String = summary
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' => c,
            _ => '-',
        })
        .collect();

    // The first container has always been keyed without its index.
    let index = match positional_index {
        0 => String::new(),
        index => index.to_string(),
    };

    let joined = [start.date_part(), start.time_part(), summary, index]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    let mut id = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '-' && id.ends_with('-') {
            continue;
        }
        id.push(c);
    }

    id.trim_matches('-').to_string()
}
