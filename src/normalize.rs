//! レビュー本文の正規化。
//!
//! NFC正規化、HTML/BBCode残骸の除去、不可視文字の削除、空白の畳み込みを行う。
//! 純粋関数で失敗しない（最悪でも空文字列を返す）。
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::review::NormalizedText;

/// Steamレビューで使われるBBCodeタグ（`[b]`, `[/h1]`, `[url=...]`など）。
static BBCODE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\[/?(?:b|i|u|s|h[1-6]|spoiler|strike|noparse|hr|list|olist|\*|quote|code|table|tr|th|td|url|img)(?:=[^\]]*)?\]",
    )
    .expect("compile bbcode regex")
});

/// 閉じ`>`まで揃った整形済みHTMLタグのみ。`story<gameplay`のような裸の`<`は対象外。
static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[a-zA-Z][^<>]*>").expect("compile html tag regex"));

static HTML_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").expect("compile entity regex"));

/// 生テキストを正規化する。
#[must_use]
pub fn normalize(raw: &str) -> NormalizedText {
    let composed = raw.nfc().collect::<String>();
    let without_markup = strip_markup(&composed);
    let visible = without_markup
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !is_invisible(*c))
        .collect::<String>();
    NormalizedText::new(collapse_whitespace(&visible))
}

fn strip_markup(text: &str) -> String {
    let without_bbcode = BBCODE_TAG.replace_all(text, " ");
    if !without_bbcode.contains('<') && !without_bbcode.contains('&') {
        return without_bbcode.into_owned();
    }
    // タグを先に落としてから実体参照を戻す。`&lt;b&gt;`が再びタグとして消えないように。
    let without_tags = HTML_TAG.replace_all(&without_bbcode, " ");
    decode_entities(&without_tags)
}

fn decode_entities(text: &str) -> String {
    HTML_ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            decode_entity(entity).map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = entity.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "hellip" => Some('…'),
        "mdash" => Some('—'),
        "ndash" => Some('–'),
        _ => None,
    }
}

/// 制御文字・書式文字（ゼロ幅、BOM、方向制御）を不可視とみなす。
fn is_invisible(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '\u{00AD}'
                | '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{2064}'
                | '\u{FEFF}'
        )
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("  Peak   gameplay \n\n totally\tworth it  ", "Peak gameplay totally worth it")]
    #[case("[h1]Great[/h1] [b]game[/b]", "Great game")]
    #[case("<p>Fun &amp; chill</p><br/>", "Fun & chill")]
    #[case("ga\u{200B}me\u{0007} over", "game over")]
    #[case("caf\u{0065}\u{0301}", "café")]
    #[case("10/10 <3", "10/10 <3")]
    #[case("combat is <so good, would recommend", "combat is <so good, would recommend")]
    #[case("the story<gameplay but still fun", "the story<gameplay but still fun")]
    #[case("<p>story<gameplay</p>", "story<gameplay")]
    #[case("&lt;b&gt;not a tag&lt;/b&gt;", "<b>not a tag</b>")]
    fn normalize_cleans_markup_and_whitespace(#[case] raw: &str, #[case] expected: &str) {
        let normalized = normalize(raw);
        assert_eq!(normalized.as_str(), expected);
        assert!(!normalized.is_empty());
    }

    #[rstest]
    #[case("")]
    #[case("   \n\t ")]
    #[case("\u{FEFF}\u{200B}")]
    #[case("[b][/b]")]
    fn normalize_flags_empty_text(#[case] raw: &str) {
        let normalized = normalize(raw);
        assert!(normalized.is_empty());
        assert_eq!(normalized.as_str(), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("<i>Mid</i>  at best ,  honestly");
        let twice = normalize(once.as_str());
        assert_eq!(once, twice);
    }

    #[test]
    fn decode_entities_keeps_unknown_entities() {
        assert_eq!(decode_entities("&bogus; &#x41;"), "&bogus; A");
    }
}
