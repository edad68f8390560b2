use crate::config::MARKUP_ROUNDS;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static LANG_LINKS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\n\[\[[a-z]{2}[\w-]*:[^:\]]+\]\])+\s*$").unwrap());

static FILE_LINK_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\[(?:file|image):").unwrap());

static COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static REF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<ref(?:[> ].*?)(?:</ref>|/>)").unwrap());

static NOWIKI_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<nowiki(?:[> ].*?)(?:</nowiki>|/>)").unwrap());

static MATH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<math(?:[> ].*?)(?:</math>|/>)").unwrap());

static TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<.*?>").unwrap());

static CATEGORY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\[Category:[^\]\[]*\]\]").unwrap());

static EXTERNAL_LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\w+://[^\s\]]*(?:\s+([^\]]*))?\]").unwrap());

static PIPED_LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]\[]*)\|([^\]\[]*)\]").unwrap());

static TABLE_LINE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:\{\||\|-|\|\}).*$").unwrap());

static TABLE_CELL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*[|!](?:[^|\[\]\n]*\|)?").unwrap());

static HEADING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^=+[ \t]*(.*?)[ \t]*=+[ \t]*$").unwrap());

static EMPHASIS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"'{2,}").unwrap());

static ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap()
});

/// Expands numeric and common named HTML entities. Unknown entities are kept verbatim.
pub fn decode_html_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    ENTITY_REGEX
        .replace_all(text, |caps: &Captures| match resolve_entity(&caps[1]) {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn resolve_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }

    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ensp" => '\u{2002}',
        "emsp" => '\u{2003}',
        "thinsp" => '\u{2009}',
        "zwnj" => '\u{200c}',
        "zwj" => '\u{200d}',
        "shy" => '\u{ad}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "minus" => '\u{2212}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "bull" => '\u{2022}',
        "middot" => '\u{b7}',
        "prime" => '\u{2032}',
        "Prime" => '\u{2033}',
        "deg" => '\u{b0}',
        "plusmn" => '\u{b1}',
        "times" => '\u{d7}',
        "divide" => '\u{f7}',
        "micro" => '\u{b5}',
        "frac12" => '\u{bd}',
        "frac14" => '\u{bc}',
        "frac34" => '\u{be}',
        "sup2" => '\u{b2}',
        "sup3" => '\u{b3}',
        "sect" => '\u{a7}',
        "para" => '\u{b6}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "cent" => '\u{a2}',
        "pound" => '\u{a3}',
        "yen" => '\u{a5}',
        "euro" => '\u{20ac}',
        "larr" => '\u{2190}',
        "rarr" => '\u{2192}',
        "harr" => '\u{2194}',
        "alpha" => '\u{3b1}',
        "beta" => '\u{3b2}',
        "gamma" => '\u{3b3}',
        "delta" => '\u{3b4}',
        "lambda" => '\u{3bb}',
        "mu" => '\u{3bc}',
        "pi" => '\u{3c0}',
        "sigma" => '\u{3c3}',
        "omega" => '\u{3c9}',
        _ => return None,
    };
    Some(c)
}

/// Strips wiki markup, keeping link labels, image captions and heading text.
pub fn remove_markup(text: &str) -> String {
    let text = LANG_LINKS_REGEX.replace(text, "");
    let text = strip_templates(&text);
    let mut text = strip_files(&text);

    for _ in 0..MARKUP_ROUNDS {
        let next = strip_round(&text);
        if next == text {
            break;
        }
        text = next;
    }

    text.replace(['[', ']'], "")
}

fn strip_round(text: &str) -> String {
    let t = COMMENT_REGEX.replace_all(text, "");
    let t = REF_REGEX.replace_all(&t, "");
    let t = NOWIKI_REGEX.replace_all(&t, "");
    let t = MATH_REGEX.replace_all(&t, "");
    let t = TAG_REGEX.replace_all(&t, "");
    let t = CATEGORY_REGEX.replace_all(&t, "");
    let t = EXTERNAL_LINK_REGEX.replace_all(&t, "$1");
    let t = PIPED_LINK_REGEX.replace_all(&t, "$2");

    // one table cell per line
    let t = t.replace("!!", "\n|").replace("|-||", "\n|");
    let t = TABLE_LINE_REGEX.replace_all(&t, "");
    let t = t.replace("|||", "|\n|").replace("||", "\n|");
    let t = TABLE_CELL_REGEX.replace_all(&t, "");

    let t = HEADING_REGEX.replace_all(&t, "$1");
    let t = EMPHASIS_REGEX.replace_all(&t, "");
    t.replace("[]", "")
}

fn strip_templates(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut run_start = 0;

    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'{' && bytes[i + 1] == b'{' {
            if run_start < i {
                result.push_str(&text[run_start..i]);
            }
            let mut depth: i32 = 0;
            while i + 1 < bytes.len() {
                if bytes[i] == b'{' && bytes[i + 1] == b'{' {
                    depth += 1;
                    i += 2;
                } else if bytes[i] == b'}' && bytes[i + 1] == b'}' {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            if depth != 0 {
                i = bytes.len();
            }
            run_start = i;
        } else {
            i += 1;
        }
    }

    if run_start < bytes.len() {
        result.push_str(&text[run_start..]);
    }

    result
}

/// Replaces `[[File:...]]` / `[[Image:...]]` links with their caption (last top-level field).
fn strip_files(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(m) = FILE_LINK_START.find(rest) {
        result.push_str(&rest[..m.start()]);
        let inner_start = m.start() + 2;
        match closing_brackets(&rest[inner_start..]) {
            Some(len) => {
                result.push_str(file_caption(&rest[inner_start..inner_start + len]));
                rest = &rest[inner_start + len + 2..];
            }
            None => {
                result.push_str(m.as_str());
                rest = &rest[m.end()..];
            }
        }
    }

    result.push_str(rest);
    result
}

/// Byte offset of the `]]` closing an already opened `[[`.
fn closing_brackets(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 1;
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] == b'[' && bytes[i + 1] == b'[' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b']' && bytes[i + 1] == b']' {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    None
}

fn file_caption(inner: &str) -> &str {
    let mut depth = 0u32;
    let mut last_pipe = None;

    for (i, b) in inner.bytes().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b'|' if depth == 0 => last_pipe = Some(i),
            _ => {}
        }
    }

    match last_pipe {
        Some(i) => &inner[i + 1..],
        None => "",
    }
}
