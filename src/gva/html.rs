//! Parsing of the mass shootings report table.
//!
//! The report is a server-rendered table with one incident per row. Only the
//! table is needed, so this walks tags by slicing instead of building a DOM.

use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use url::Url;

use super::types::{parse_date, MassShootingRecord};

/// Element id of the main content block holding the report table
const MAIN_BLOCK_ID: &str = "block-system-main";

/// Cells per row: id, date, state, city/county, address, killed, injured, operations
const COLUMNS: usize = 8;

/// Parse the records out of one report page.
///
/// A table without rows (or only an "empty" message row) yields no records,
/// which callers treat as the end of data.
pub fn parse_mass_shootings(html: &str, base_url: &Url) -> Result<Vec<MassShootingRecord>> {
  let scope = match html.to_ascii_lowercase().find(MAIN_BLOCK_ID) {
    Some(at) => &html[at..],
    None => html,
  };

  let table = tag_blocks(scope, "table")
    .into_iter()
    .next()
    .ok_or_else(|| eyre!("cannot find HTML table"))?;

  let body = tag_blocks(table, "tbody").into_iter().next().unwrap_or(table);

  let mut records = Vec::with_capacity(25);
  for (n, row) in tag_blocks(body, "tr").into_iter().enumerate() {
    let cells = tag_blocks(row, "td");
    if cells.len() <= 1 {
      // "No incidents" message spanning the table
      continue;
    }

    let record = parse_row(&cells, base_url).wrap_err_with(|| format!("bad table row {}", n))?;
    records.push(record);
  }

  Ok(records)
}

fn parse_row(cells: &[&str], base_url: &Url) -> Result<MassShootingRecord> {
  if cells.len() < COLUMNS {
    return Err(eyre!(
      "table got {} columns, expected {}",
      cells.len(),
      COLUMNS
    ));
  }

  let links: Vec<&str> = cells[COLUMNS - 1..]
    .iter()
    .flat_map(|cell| hrefs(cell))
    .collect();
  if links.len() < 2 {
    return Err(eyre!(
      "table's operations cell got {} links, expected 2",
      links.len()
    ));
  }

  let text: Vec<String> = cells[..COLUMNS - 1].iter().map(|c| cell_text(c)).collect();

  let incident_id = text[0]
    .parse()
    .map_err(|e| eyre!("Failed to parse incident id '{}': {}", text[0], e))?;

  let incident_url = base_url
    .join(links[0])
    .map_err(|e| eyre!("Failed to resolve incident link '{}': {}", links[0], e))?;

  Ok(MassShootingRecord {
    incident_id,
    incident_date: parse_date(&text[1])?,
    state: text[2].clone(),
    city_county: text[3].clone(),
    address: text[4].clone(),
    killed: parse_count(&text[5]),
    injured: parse_count(&text[6]),
    incident_url: incident_url.to_string(),
    source_url: decode_entities(links[1]),
  })
}

/// Counts are occasionally blank; treat anything unparseable as zero.
fn parse_count(s: &str) -> u32 {
  s.replace(',', "").parse().unwrap_or(0)
}

/// Inner HTML of every `<tag ...>...</tag>` block in `s`, in order.
///
/// Blocks of the same tag are assumed not to nest, which holds for the
/// table parts this is used on.
fn tag_blocks<'a>(s: &'a str, tag: &str) -> Vec<&'a str> {
  // ASCII lowercasing keeps byte offsets aligned with `s`.
  let lower = s.to_ascii_lowercase();
  let open = format!("<{}", tag);
  let close = format!("</{}", tag);

  let mut blocks = Vec::new();
  let mut from = 0;

  while let Some(rel) = lower[from..].find(&open) {
    let name_end = from + rel + open.len();

    // Skip longer tag names sharing the prefix (e.g. <track> for <tr>)
    match lower.as_bytes().get(name_end) {
      Some(b'>' | b'/') => {}
      Some(b) if b.is_ascii_whitespace() => {}
      _ => {
        from = name_end;
        continue;
      }
    }

    let Some(gt) = lower[name_end..].find('>') else {
      break;
    };
    let inner_start = name_end + gt + 1;

    let Some(len) = lower[inner_start..].find(&close) else {
      break;
    };
    let inner_end = inner_start + len;

    blocks.push(&s[inner_start..inner_end]);
    from = inner_end + close.len();
  }

  blocks
}

/// Values of every `href` attribute in `s`, in order.
fn hrefs(s: &str) -> Vec<&str> {
  let lower = s.to_ascii_lowercase();
  let mut out = Vec::new();
  let mut from = 0;

  while let Some(rel) = lower[from..].find("href=") {
    let value_start = from + rel + "href=".len();
    let Some(&quote) = s.as_bytes().get(value_start) else {
      break;
    };
    if quote != b'"' && quote != b'\'' {
      from = value_start;
      continue;
    }

    let Some(len) = s[value_start + 1..].find(quote as char) else {
      break;
    };
    out.push(&s[value_start + 1..value_start + 1 + len]);
    from = value_start + 1 + len + 1;
  }

  out
}

/// Visible text of a cell: tags stripped, entities decoded, whitespace collapsed.
fn cell_text(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut in_tag = false;

  for ch in s.chars() {
    match ch {
      '<' => in_tag = true,
      '>' => in_tag = false,
      _ if !in_tag => out.push(ch),
      _ => {}
    }
  }

  decode_entities(&out)
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}

fn decode_entities(s: &str) -> String {
  if !s.contains('&') {
    return s.to_string();
  }

  let mut out = String::with_capacity(s.len());
  let mut rest = s;

  while let Some(amp) = rest.find('&') {
    out.push_str(&rest[..amp]);
    rest = &rest[amp..];

    let decoded = rest.find(';').and_then(|semi| {
      let ch = match &rest[1..semi] {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        num if num.starts_with("#x") || num.starts_with("#X") => {
          u32::from_str_radix(&num[2..], 16).ok().and_then(char::from_u32)
        }
        num if num.starts_with('#') => num[1..].parse().ok().and_then(char::from_u32),
        _ => None,
      }?;
      Some((ch, semi))
    });

    match decoded {
      Some((ch, semi)) => {
        out.push(ch);
        rest = &rest[semi + 1..];
      }
      None => {
        out.push('&');
        rest = &rest[1..];
      }
    }
  }

  out.push_str(rest);
  out
}
