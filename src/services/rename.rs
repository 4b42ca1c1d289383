use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::release::{ReleaseMetadata, ReleaseTrackMetadata};

/// A marker character inserted in place of an omitted placeholder (spec §6.3
/// singles handling) so the cleanup pass can find and remove it, along with
/// its surrounding separator punctuation, after substitution. Not a character
/// any real tag value can contain.
const OMIT_MARKER: char = '\u{0}';

/// `ParseDatePrecision` (spec §8): length is used as a proxy for ISO-8601
/// prefix precision rather than attempting a partial parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DatePrecision {
    None,
    Year,
    Month,
    Day,
}

pub fn date_precision(date: &str) -> DatePrecision {
    match date.len() {
        4 => DatePrecision::Year,
        7 => DatePrecision::Month,
        10 => DatePrecision::Day,
        _ => DatePrecision::None,
    }
}

/// Picks the higher-precision of two date strings, ties broken by `original`
/// (spec §8 `BestDate`).
pub fn best_date<'a>(original: Option<&'a str>, release: Option<&'a str>) -> Option<&'a str> {
    match (original, release) {
        (None, None) => None,
        (Some(o), None) => Some(o),
        (None, Some(r)) => Some(r),
        (Some(o), Some(r)) => {
            if date_precision(r) > date_precision(o) { Some(r) } else { Some(o) }
        }
    }
}

fn year_prefix(date: &str) -> Option<i64> {
    date.get(0..4).and_then(|s| s.parse().ok())
}

fn release_date_string(release: &ReleaseMetadata) -> Option<String> {
    release.date.clone().or_else(|| release.year.map(|y| y.to_string()))
}

/// The `{year}` placeholder: the year prefix of whichever of `original_date`/
/// `date` wins `best_date` — this is why a reissue's folder prefix shows the
/// *original* year (spec §8 end-to-end scenario 6) even though the `[... reissue]`
/// annotation names the release year.
fn display_year(release: &ReleaseMetadata) -> Option<i64> {
    let date_str = release_date_string(release);
    best_date(release.original_date.as_deref(), date_str.as_deref()).and_then(year_prefix)
}

fn original_year(release: &ReleaseMetadata) -> Option<i64> {
    release.original_date.as_deref().and_then(year_prefix)
}

/// `originalyear != releaseyear` (spec §6.3 reissue detection), comparing the
/// raw fields rather than the display-preferring `best_date` result.
fn is_reissue(release: &ReleaseMetadata) -> bool {
    match (original_year(release), release.year) {
        (Some(o), Some(r)) => o != r,
        _ => false,
    }
}

fn feat_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*[(\[]?\b(feat\.?|ft\.?)\b.*$").unwrap())
}

fn standalone_and_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\band\b").unwrap())
}

fn separator_run_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*[/\\><*:_|]+\s*").unwrap())
}

fn whitespace_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").unwrap())
}

fn map_quote_marks(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' | '\u{201e}' | '"' | '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

/// The post-resolution cleaning pipeline (spec §6.3), applied to a single
/// field value before it is substituted into a template. Order: strip
/// `feat.`/`ft.`, collapse whitespace, `...` → `…`, standalone `and` → `&`,
/// drop `?`/`¿`, map quote marks to `'`, collapse separator runs to ` - `,
/// collapse whitespace again.
pub fn clean_field(raw: &str) -> String {
    let stripped = feat_pattern().replace(raw, "").into_owned();
    let collapsed = whitespace_pattern().replace_all(&stripped, " ").trim().to_string();
    let ellipsis = collapsed.replace("...", "\u{2026}");
    let ampersand = standalone_and_pattern().replace_all(&ellipsis, "&").into_owned();
    let no_marks = ampersand.replace('?', "").replace('\u{00bf}', "");
    let quoted = map_quote_marks(&no_marks);
    let no_separators = separator_run_pattern().replace_all(&quoted, " - ").into_owned();
    whitespace_pattern().replace_all(&no_separators, " ").trim().to_string()
}

/// Strips a trailing `.` from a cleaned folder segment (spec §6.3, the one
/// cleanup step applied only to folder segments).
fn clean_folder_segment(segment: &str) -> String {
    segment.trim_end_matches('.').to_string()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AlbumContext {
    Folder,
    Filename,
}

fn artist_value(raw: &str) -> String {
    let cleaned = clean_field(raw);
    if cleaned.is_empty() { "[unknown artist]".to_string() } else { cleaned }
}

fn album_artist_value(release: &ReleaseMetadata) -> String {
    if release.is_various_artists() {
        return "[Various Artists]".to_string();
    }
    artist_value(&release.album_artist)
}

fn album_value(release: &ReleaseMetadata, ctx: AlbumContext) -> String {
    let cleaned = clean_field(&release.album);
    let mut value = if cleaned.is_empty() {
        match ctx {
            AlbumContext::Folder => "[unknown album]".to_string(),
            AlbumContext::Filename => "unknown album".to_string(),
        }
    } else {
        cleaned
    };

    if let Some(annotation) = release.compilation_annotation() {
        value.push_str(&format!(" [{annotation}]"));
    }

    if is_reissue(release) {
        if let Some(release_year) = release.year {
            value.push_str(&format!(" [{release_year} reissue]"));
        }
    }

    value
}

fn title_value(release: &ReleaseMetadata, track: &ReleaseTrackMetadata) -> String {
    let cleaned = clean_field(&track.title);
    let mut value = if cleaned.is_empty() { "unknown title".to_string() } else { cleaned };

    if let Some(annotation) = release.title_annotation() {
        value.push_str(&format!(" [{annotation}]"));
    }

    value
}

fn track_number_value(release: &ReleaseMetadata, track: &ReleaseTrackMetadata) -> String {
    let track_number = track.track_number.unwrap_or(0).max(0);
    let formatted = format!("{track_number:02}");

    if release.total_discs > 1 {
        let disc_number = track.disc_number.unwrap_or(1);
        if disc_number > 0 {
            return format!("{disc_number:02}.{formatted}");
        }
    }

    formatted
}

fn disc_number_value(track: &ReleaseTrackMetadata) -> String {
    track.disc_number.unwrap_or(1).to_string()
}

fn placeholder_values(
    release: &ReleaseMetadata,
    track: &ReleaseTrackMetadata,
    ctx: AlbumContext,
    omit_album_and_track_number: bool,
) -> HashMap<&'static str, String> {
    let mut values = HashMap::new();
    values.insert("artist", artist_value(&track.artist));
    values.insert("albumartist", album_artist_value(release));
    values.insert("title", title_value(release, track));
    values.insert(
        "year",
        display_year(release).map(|y| y.to_string()).unwrap_or_default(),
    );
    values.insert(
        "originalyear",
        original_year(release).map(|y| y.to_string()).unwrap_or_default(),
    );
    values.insert(
        "date",
        best_date(release.original_date.as_deref(), release_date_string(release).as_deref())
            .unwrap_or_default()
            .to_string(),
    );
    values.insert("discnumber", disc_number_value(track));

    if omit_album_and_track_number {
        values.insert("album", OMIT_MARKER.to_string());
        values.insert("tracknumber", OMIT_MARKER.to_string());
    } else {
        values.insert("album", album_value(release, ctx));
        values.insert("tracknumber", track_number_value(release, track));
    }

    values
}

/// Substitutes `{placeholder}` tokens, with `{{`/`}}` treated as literal braces
/// (spec §6.3, design note §9).
fn render_template(template: &str, values: &HashMap<&'static str, String>) -> String {
    let protected = template.replace("{{", "\u{1}").replace("}}", "\u{2}");

    let rendered = placeholder_pattern().replace_all(&protected, |caps: &regex::Captures| {
        values.get(&caps[1]).cloned().unwrap_or_default()
    });

    rendered.replace('\u{1}', "{").replace('\u{2}', "}")
}

/// Removes an `OMIT_MARKER` together with the separator punctuation that
/// *precedes* it — its own leading separator — leaving whatever separator
/// follows it intact to join the surviving segments on either side. Used
/// only for the singles case (spec §6.3), where the album and track-number
/// segments of a filename are dropped entirely rather than rendered as
/// empty strings: `"{artist} • {album} • {tracknumber} · {title}"` with
/// `{album}`/`{tracknumber}` omitted resolves to `"{artist} · {title}"` —
/// each marker eats the `•` before it, leaving the `·` before `{title}`.
fn strip_omitted_segments(rendered: &str) -> String {
    static MARKER_RUN: OnceLock<Regex> = OnceLock::new();
    let re = MARKER_RUN
        .get_or_init(|| Regex::new(&format!(r"[\s•·\-]*{}", regex::escape(&OMIT_MARKER.to_string()))).unwrap());

    let without_markers = re.replace_all(rendered, "");
    let collapsed = whitespace_pattern().replace_all(&without_markers, " ");
    collapsed.trim().trim_matches(|c: char| "•·-".contains(c)).trim().to_string()
}

/// Resolves the folder-template component of an imported track's destination
/// path (spec §6.3): substitutes placeholders, then strips a trailing `.`
/// from each `/`-delimited segment.
pub fn resolve_folder(template: &str, release: &ReleaseMetadata, track: &ReleaseTrackMetadata) -> String {
    let values = placeholder_values(release, track, AlbumContext::Folder, false);
    let rendered = render_template(template, &values);
    rendered.split('/').map(clean_folder_segment).collect::<Vec<_>>().join("/")
}

/// Resolves the filename-template component (without extension) of an
/// imported track's destination path (spec §6.3): substitutes placeholders,
/// then — for a singles release — drops the album and track-number segments.
pub fn resolve_filename(template: &str, release: &ReleaseMetadata, track: &ReleaseTrackMetadata) -> String {
    let omit = release.is_singles();
    let values = placeholder_values(release, track, AlbumContext::Filename, omit);
    let rendered = render_template(template, &values);

    if omit { strip_omitted_segments(&rendered) } else { rendered }
}

/// Full destination path for an imported track (spec §6.3): `<library_root>/
/// <folder>/<filename><ext>`.
pub fn resolve_destination(
    library_root: &Path,
    folder_template: &str,
    filename_template: &str,
    release: &ReleaseMetadata,
    track: &ReleaseTrackMetadata,
    extension: &str,
) -> PathBuf {
    let folder = resolve_folder(folder_template, release, track);
    let filename = resolve_filename(filename_template, release, track);

    let mut path = library_root.to_path_buf();
    for segment in folder.split('/') {
        if !segment.is_empty() {
            path.push(segment);
        }
    }
    path.push(format!("{filename}.{extension}"));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn release(album_artist: &str, album: &str, date: Option<&str>, original_date: Option<&str>) -> ReleaseMetadata {
        ReleaseMetadata {
            release_group_id: Uuid::nil(),
            release_id: Uuid::nil(),
            album_artist: album_artist.to_string(),
            album: album.to_string(),
            year: date.and_then(year_prefix),
            date: date.map(str::to_string),
            original_date: original_date.map(str::to_string),
            label: None,
            catalog_number: None,
            barcode: None,
            media: None,
            country: None,
            script: None,
            release_type_primary: None,
            secondary_types: Vec::new(),
            total_discs: 1,
        }
    }

    fn track(title: &str, artist: &str, track_number: Option<i64>) -> ReleaseTrackMetadata {
        ReleaseTrackMetadata { title: title.to_string(), artist: artist.to_string(), track_number, disc_number: None }
    }

    #[test]
    fn date_precision_matches_iso_prefix_lengths() {
        assert_eq!(date_precision("2007"), DatePrecision::Year);
        assert_eq!(date_precision("2007-06"), DatePrecision::Month);
        assert_eq!(date_precision("2007-06-04"), DatePrecision::Day);
        assert_eq!(date_precision("not-a-date"), DatePrecision::None);
        assert_eq!(date_precision(""), DatePrecision::None);
    }

    #[test]
    fn best_date_prefers_higher_precision_then_original_on_tie() {
        assert_eq!(best_date(Some("1979"), Some("2007-06-04")), Some("2007-06-04"));
        assert_eq!(best_date(Some("1979"), Some("2007")), Some("1979"));
        assert_eq!(best_date(None, Some("2007")), Some("2007"));
        assert_eq!(best_date(Some("1979"), None), Some("1979"));
    }

    #[test]
    fn clean_field_strips_feat_and_normalizes_punctuation() {
        assert_eq!(clean_field("Song (feat. Someone Else)"), "Song");
        assert_eq!(clean_field("Song ft. Someone"), "Song");
        assert_eq!(clean_field("Rock and Roll"), "Rock & Roll");
        assert_eq!(clean_field("Wait..."), "Wait\u{2026}");
        assert_eq!(clean_field("What?"), "What");
        assert_eq!(clean_field("AC/DC"), "AC - DC");
        assert_eq!(clean_field("\u{201c}Quoted\u{201d}"), "'Quoted'");
    }

    #[test]
    fn import_path_derivation_matches_reissue_scenario() {
        let release = release("Joy Division", "Unknown Pleasures", Some("2007"), Some("1979"));
        let track = track("Disorder", "Joy Division", Some(1));

        let folder = resolve_folder("{albumartist}/{year} \u{2022} {album}", &release, &track);
        assert_eq!(folder, "Joy Division/1979 \u{2022} Unknown Pleasures [2007 reissue]");

        let filename = resolve_filename(
            "{artist} \u{2022} {album} \u{2022} {tracknumber} \u{b7} {title}",
            &release,
            &track,
        );
        assert_eq!(filename, "Joy Division \u{2022} Unknown Pleasures [2007 reissue] \u{2022} 01 \u{b7} Disorder");
    }

    #[test]
    fn missing_fields_use_bracketed_or_plain_placeholders() {
        let release = release("", "", None, None);
        let track = track("", "", None);

        let folder = resolve_folder("{albumartist}/{album}", &release, &track);
        assert_eq!(folder, "[unknown artist]/[unknown album]");

        let filename = resolve_filename("{artist} - {album} - {tracknumber} - {title}", &release, &track);
        assert_eq!(filename, "[unknown artist] - unknown album - 00 - unknown title");
    }

    #[test]
    fn various_artists_renders_bracketed_folder_name() {
        let mut release = release("Various Artists", "Now That's What I Call Music", None, None);
        release.secondary_types.push("compilation".to_string());
        let track = track("Track", "Some Artist", Some(1));

        let folder = resolve_folder("{albumartist}/{album}", &release, &track);
        assert_eq!(folder, "[Various Artists]/Now That's What I Call Music");
    }

    #[test]
    fn singles_release_omits_album_and_track_number_segments() {
        let mut release = release("Artist", crate::domain::release::SINGLES_ALBUM, Some("2020"), None);
        release.release_type_primary = Some("Single".to_string());
        let track = track("A-Side", "Artist", Some(1));

        let filename = resolve_filename(
            "{artist} \u{2022} {album} \u{2022} {tracknumber} \u{b7} {title}",
            &release,
            &track,
        );
        assert_eq!(filename, "Artist \u{b7} A-Side");
    }

    #[test]
    fn multi_disc_track_number_renders_disc_dot_track() {
        let mut release = release("Artist", "Album", Some("2000"), None);
        release.total_discs = 2;
        let mut track = track("Title", "Artist", Some(5));
        track.disc_number = Some(2);

        assert_eq!(track_number_value(&release, &track), "02.05");
    }
}
