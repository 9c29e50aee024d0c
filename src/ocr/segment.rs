//! Page segmentation.
//!
//! The primary segmenter is purely geometric: a vertical split at the
//! horizontal midpoint plus a header strip. The fallback segmenter works on
//! recognized text instead, carving a window of characters around each eye
//! marker, for reports whose two eyes are not printed side by side.

use anyhow::Result;
use image::DynamicImage;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::biometry::Eye;

/// Which half of the page holds the right eye.
///
/// Most report templates print OD on the left, but some reverse it, so this
/// is a setting rather than a constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EyeSide {
    /// Left half = OD, right half = OS
    #[default]
    LeftIsOd,
    /// Left half = OS, right half = OD
    LeftIsOs,
}

/// Which part of a document a piece of text came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum RegionKind {
    OdHalf,
    OsHalf,
    Header,
    WholePage,
    TextLayer,
}

impl RegionKind {
    pub fn half_for(eye: Eye) -> Self {
        match eye {
            Eye::Od => RegionKind::OdHalf,
            Eye::Os => RegionKind::OsHalf,
        }
    }
}

impl std::fmt::Display for RegionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RegionKind::OdHalf => "OD half",
            RegionKind::OsHalf => "OS half",
            RegionKind::Header => "header",
            RegionKind::WholePage => "whole page",
            RegionKind::TextLayer => "text layer",
        };
        f.write_str(name)
    }
}

/// The two eye regions of a page.
#[derive(Debug, Clone)]
pub struct EyeRegions {
    pub od: DynamicImage,
    pub os: DynamicImage,
}

impl EyeRegions {
    pub fn get(&self, eye: Eye) -> &DynamicImage {
        match eye {
            Eye::Od => &self.od,
            Eye::Os => &self.os,
        }
    }
}

/// Splits the page at `width / 2` (floor). Left covers `[0, mid)`, right
/// covers `[mid, width)`, so the widths always sum to the page width.
pub fn split_halves(page: &DynamicImage) -> (DynamicImage, DynamicImage) {
    let (width, height) = (page.width(), page.height());
    let mid = width / 2;
    let left = page.crop_imm(0, 0, mid, height);
    let right = page.crop_imm(mid, 0, width - mid, height);
    (left, right)
}

/// Splits the page and assigns halves to eyes according to `side`.
pub fn split_eyes(page: &DynamicImage, side: EyeSide) -> EyeRegions {
    let (left, right) = split_halves(page);
    match side {
        EyeSide::LeftIsOd => EyeRegions { od: left, os: right },
        EyeSide::LeftIsOs => EyeRegions { od: right, os: left },
    }
}

/// Crops the top `ratio` of the page at full width.
pub fn header_region(page: &DynamicImage, ratio: f32) -> DynamicImage {
    let (width, height) = (page.width(), page.height());
    let header_height = ((height as f64) * ratio.clamp(0.0, 1.0) as f64).round() as u32;
    page.crop_imm(0, 0, width, header_height.min(height))
}

/// Text chunks found around eye markers in a whole-page pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerChunks {
    pub od: Vec<String>,
    pub os: Vec<String>,
}

impl MarkerChunks {
    pub fn for_eye(&self, eye: Eye) -> &[String] {
        match eye {
            Eye::Od => &self.od,
            Eye::Os => &self.os,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.od.is_empty() && self.os.is_empty()
    }

    fn push(&mut self, eye: Eye, chunk: String) {
        match eye {
            Eye::Od => self.od.push(chunk),
            Eye::Os => self.os.push(chunk),
        }
    }
}

/// Right-eye markers. The two-letter codes are case-sensitive so that
/// ordinary words ("os", "od") in running text are not taken as markers.
const OD_MARKERS: &str = r"\bOD\b|\bO\.D\.|(?i:\bright\b|\bdireito\b)";
/// Left-eye markers (OE = olho esquerdo).
const OS_MARKERS: &str = r"\bOS\b|\bOE\b|\bO\.S\.|\bO\.E\.|(?i:\bleft\b|\besquerdo\b)";

#[derive(Debug, Clone, Copy)]
struct MarkerHit {
    eye: Eye,
    start: usize,
    end: usize,
}

/// Locates eye markers in whole-page text and slices out the text that
/// belongs to each one.
pub struct MarkerSegmenter {
    od_markers: Regex,
    os_markers: Regex,
    window: usize,
}

impl MarkerSegmenter {
    /// `window` caps how many characters a chunk reaches on each side of
    /// its marker.
    pub fn new(window: usize) -> Result<Self> {
        Ok(Self {
            od_markers: Regex::new(OD_MARKERS)?,
            os_markers: Regex::new(OS_MARKERS)?,
            window,
        })
    }

    /// Returns the chunks of each eye in document order.
    ///
    /// A chunk runs from its marker up to the next marker of either eye and
    /// reaches back no further than the start of the marker's line, or the
    /// marker itself when another marker precedes it on that line.
    ///
    /// A line without digits that carries markers of both eyes is a column
    /// header. The lines below it, up to the next marker line, are split
    /// into a left and a right column, one chunk per column.
    pub fn chunks(&self, text: &str) -> MarkerChunks {
        let hits = self.find_markers(text);
        let mut chunks = MarkerChunks::default();

        let mut i = 0;
        while i < hits.len() {
            let (line_start, line_end) = line_bounds(text, hits[i].start);
            let count = hits[i..].iter().take_while(|h| h.start < line_end).count();
            let line_hits = &hits[i..i + count];
            let next_start = hits.get(i + count).map(|h| h.start);
            i += count;

            if let Some((left, right)) = column_header(&text[line_start..line_end], line_hits) {
                let block_end = next_start
                    .map(|start| line_bounds(text, start).0)
                    .unwrap_or(text.len());
                let boundary = text[line_start..right.start].chars().count();
                let (left_text, right_text) = split_columns(&text[line_end..block_end], boundary);
                if !left_text.is_empty() || !right_text.is_empty() {
                    log::debug!("Two-column block at byte {}, boundary column {}", line_start, boundary);
                    chunks.push(left.eye, left_text);
                    chunks.push(right.eye, right_text);
                    continue;
                }
            }

            for (k, hit) in line_hits.iter().enumerate() {
                let (back, forward) = window_bounds(text, hit.start, hit.end, self.window);
                let from = if k == 0 { back.max(line_start) } else { hit.start };
                let to = line_hits
                    .get(k + 1)
                    .map(|h| h.start)
                    .or(next_start)
                    .unwrap_or(text.len())
                    .min(forward);
                chunks.push(hit.eye, text[from..to].to_string());
            }
        }

        chunks
    }

    /// All marker occurrences of both eyes, sorted by position.
    fn find_markers(&self, text: &str) -> Vec<MarkerHit> {
        let mut hits: Vec<MarkerHit> = [(Eye::Od, &self.od_markers), (Eye::Os, &self.os_markers)]
            .into_iter()
            .flat_map(|(eye, markers)| {
                markers.find_iter(text).map(move |m| MarkerHit {
                    eye,
                    start: m.start(),
                    end: m.end(),
                })
            })
            .collect();
        hits.sort_by_key(|h| h.start);
        hits.dedup_by(|later, earlier| later.start < earlier.end);
        hits
    }
}

/// Byte range of the line containing `pos`, without its newline.
fn line_bounds(text: &str, pos: usize) -> (usize, usize) {
    let start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[pos..].find('\n').map(|i| pos + i).unwrap_or(text.len());
    (start, end)
}

/// Returns the first marker and the first marker of the other eye when
/// `line` is a column header.
fn column_header(line: &str, hits: &[MarkerHit]) -> Option<(MarkerHit, MarkerHit)> {
    if line.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let left = *hits.first()?;
    let split = hits.iter().position(|h| h.eye != left.eye)?;
    let right = hits[split];
    hits[split..]
        .iter()
        .all(|h| h.eye == right.eye)
        .then_some((left, right))
}

/// Splits every line of `body` at the column `boundary`. Lines that cannot
/// be split with confidence are dropped.
fn split_columns(body: &str, boundary: usize) -> (String, String) {
    let mut left = String::new();
    let mut right = String::new();
    for line in body.lines() {
        match split_line(line, boundary) {
            Some((l, r)) => {
                push_line(&mut left, l);
                push_line(&mut right, r);
            }
            None if !line.trim().is_empty() => {
                log::debug!("Dropping unsplittable two-column line {:?}", line);
            }
            None => {}
        }
    }
    (left, right)
}

fn push_line(column: &mut String, part: &str) {
    let part = part.trim();
    if !part.is_empty() {
        column.push_str(part);
        column.push('\n');
    }
}

/// Tries, in order: a line that ends before the boundary (left only), a run
/// of two or more spaces (nearest the boundary wins), and a repeat of the
/// line's leading label.
fn split_line(line: &str, boundary: usize) -> Option<(&str, &str)> {
    if line.trim().is_empty() {
        return None;
    }
    if line.trim_end().chars().count() <= boundary {
        return Some((line, ""));
    }
    if let Some((gap_start, gap_end)) = nearest_gap(line, boundary) {
        return Some((&line[..gap_start], &line[gap_end..]));
    }
    repeated_label(line).map(|at| line.split_at(at))
}

/// Byte range of the run of spaces whose end column is closest to
/// `boundary`. Trailing spaces do not count.
fn nearest_gap(line: &str, boundary: usize) -> Option<(usize, usize)> {
    let mut gaps = Vec::new();
    let mut run: Option<(usize, usize)> = None;
    for (col, (i, c)) in line.char_indices().enumerate() {
        if c == ' ' {
            let (start, len) = run.unwrap_or((i, 0));
            run = Some((start, len + 1));
        } else if let Some((start, len)) = run.take() {
            if len >= 2 {
                gaps.push((start, i, col));
            }
        }
    }
    gaps.into_iter()
        .min_by_key(|&(_, _, col)| col.abs_diff(boundary))
        .map(|(start, end, _)| (start, end))
}

/// Byte offset where the line's first word appears again after a space,
/// as in "ACD: 3.15mm ACD: 3.22mm".
fn repeated_label(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let label = trimmed.split_whitespace().next()?;
    if label.chars().count() < 2 || label.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let after = line.len() - trimmed.len() + label.len();
    line[after..]
        .match_indices(label)
        .map(|(i, _)| after + i)
        .find(|&at| line[..at].ends_with(' '))
}

/// Byte bounds `radius` characters before `start` and after `end`, on char
/// boundaries.
fn window_bounds(text: &str, start: usize, end: usize, radius: usize) -> (usize, usize) {
    let from = if radius == 0 {
        start
    } else {
        text[..start]
            .char_indices()
            .rev()
            .nth(radius - 1)
            .map(|(i, _)| i)
            .unwrap_or(0)
    };

    let to = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());

    (from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn page(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, _| {
            Luma([(x % 256) as u8])
        }))
    }

    #[test]
    fn test_split_even_width() {
        let (left, right) = split_halves(&page(200, 50));
        assert_eq!((left.width(), left.height()), (100, 50));
        assert_eq!((right.width(), right.height()), (100, 50));
    }

    #[test]
    fn test_split_odd_width_uses_floor() {
        let img = page(201, 40);
        for _ in 0..3 {
            let (left, right) = split_halves(&img);
            assert_eq!(left.width(), 100);
            assert_eq!(right.width(), 101);
            assert_eq!(left.width() + right.width(), 201);
        }
    }

    #[test]
    fn test_split_regions_do_not_overlap() {
        let (left, right) = split_halves(&page(11, 2));
        let left = left.to_luma8();
        let right = right.to_luma8();
        // Last column of the left half is x=4, first column of the right half is x=5
        assert_eq!(left.get_pixel(left.width() - 1, 0)[0], 4);
        assert_eq!(right.get_pixel(0, 0)[0], 5);
    }

    #[test]
    fn test_eye_side_convention() {
        let img = page(10, 2);

        let default = split_eyes(&img, EyeSide::LeftIsOd);
        assert_eq!(default.od.to_luma8().get_pixel(0, 0)[0], 0);
        assert_eq!(default.os.to_luma8().get_pixel(0, 0)[0], 5);

        let inverted = split_eyes(&img, EyeSide::LeftIsOs);
        assert_eq!(inverted.od.to_luma8().get_pixel(0, 0)[0], 5);
        assert_eq!(inverted.get(Eye::Os).to_luma8().get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_header_region() {
        let header = header_region(&page(300, 1000), 0.22);
        assert_eq!((header.width(), header.height()), (300, 220));

        let clamped = header_region(&page(300, 100), 1.5);
        assert_eq!(clamped.height(), 100);
    }

    #[test]
    fn test_window_bounds_are_char_safe() {
        let text = "Câmara ÓD xyz";
        let start = text.find("ÓD").unwrap();
        let end = start + "ÓD".len();
        let slice = |radius| {
            let (from, to) = window_bounds(text, start, end, radius);
            &text[from..to]
        };
        assert_eq!(slice(2), "a ÓD x");
        assert_eq!(slice(100), text);
        assert_eq!(slice(0), "ÓD");
    }

    #[test]
    fn test_marker_chunks_stop_at_next_marker_on_line() {
        let segmenter = MarkerSegmenter::new(16).unwrap();
        let text = format!(
            "OD Comp. AL: 24.05 {} OS Comp. AL: 23.90",
            ".".repeat(24)
        );

        let chunks = segmenter.chunks(&text);

        assert_eq!(chunks.od, vec!["OD Comp. AL: 24.05".to_string()]);
        assert_eq!(chunks.os, vec!["OS Comp. AL: 23.90".to_string()]);
    }

    #[test]
    fn test_serial_blocks_do_not_leak_into_each_other() {
        let segmenter = MarkerSegmenter::new(250).unwrap();
        let text = "OD\nComp. AL: 24.05\nMV: 43.20/44.80\nACD: 3.15mm\n\
                    OS\nComp. AL: 23.90\nMV: 43.50/44.10\nACD: 3.22mm";

        let chunks = segmenter.chunks(text);

        assert_eq!(chunks.od.len(), 1);
        assert_eq!(chunks.os.len(), 1);
        assert!(chunks.od[0].contains("24.05"));
        assert!(!chunks.od[0].contains("23.90"));
        assert!(chunks.os[0].starts_with("OS\n"));
        assert!(chunks.os[0].contains("3.22mm"));
        assert!(!chunks.os[0].contains("24.05"));
        assert!(!chunks.os[0].contains("43.20"));
    }

    #[test]
    fn test_label_before_marker_stays_in_chunk() {
        let segmenter = MarkerSegmenter::new(250).unwrap();

        let chunks = segmenter.chunks("Axial length\nAL OD 24.05 OS 23.90");

        assert_eq!(chunks.od, vec!["AL OD 24.05 ".to_string()]);
        assert_eq!(chunks.os, vec!["OS 23.90".to_string()]);
    }

    #[test]
    fn test_aligned_two_column_block() {
        let segmenter = MarkerSegmenter::new(250).unwrap();
        let row = |left: &str, right: &str| format!("{:<24}{}\n", left, right);
        let text = [
            row("OD", "OS"),
            row("Comp. AL: 24.05 mm", "Comp. AL: 23.90 mm"),
            row("MV: 43.20/44.80 D", "MV: 43.50/44.10 D"),
            row("", "ACD: 3.22 mm"),
            row("ACD: 3.15 mm", ""),
        ]
        .concat();

        let chunks = segmenter.chunks(&text);

        assert_eq!(
            chunks.od,
            vec!["Comp. AL: 24.05 mm\nMV: 43.20/44.80 D\nACD: 3.15 mm\n".to_string()]
        );
        assert_eq!(
            chunks.os,
            vec!["Comp. AL: 23.90 mm\nMV: 43.50/44.10 D\nACD: 3.22 mm\n".to_string()]
        );
    }

    #[test]
    fn test_single_spaced_two_column_block() {
        let segmenter = MarkerSegmenter::new(250).unwrap();
        let text = "OD OS\n\
                    Comp. AL: 24.05 Comp. AL: 23.90\n\
                    MV: 43.20/44.80 MV: 43.50/44.10\n\
                    K1 K2 ?? garbled\n\
                    ACD: 3.15mm ACD: 3.22mm";

        let chunks = segmenter.chunks(text);

        assert_eq!(
            chunks.od,
            vec!["Comp. AL: 24.05\nMV: 43.20/44.80\nACD: 3.15mm\n".to_string()]
        );
        assert_eq!(
            chunks.os,
            vec!["Comp. AL: 23.90\nMV: 43.50/44.10\nACD: 3.22mm\n".to_string()]
        );
    }

    #[test]
    fn test_column_block_ends_at_next_marker_line() {
        let segmenter = MarkerSegmenter::new(250).unwrap();
        let text = "Right Left\nAL: 24.05 AL: 23.90\nOD\nACD: 3.15";

        let chunks = segmenter.chunks(text);

        assert_eq!(chunks.od, vec!["AL: 24.05\n".to_string(), "OD\nACD: 3.15".to_string()]);
        assert_eq!(chunks.os, vec!["AL: 23.90\n".to_string()]);
    }

    #[test]
    fn test_marker_synonyms() {
        let segmenter = MarkerSegmenter::new(5).unwrap();

        let chunks = segmenter.chunks("Olho Direito | O.S. | Left | Esquerdo | OE");
        assert_eq!(chunks.od.len(), 1);
        assert_eq!(chunks.os.len(), 4);

        // Lower-case "os" is a Portuguese article, not a marker
        let chunks = segmenter.chunks("todos os dados do exame");
        assert!(chunks.is_empty());
    }
}
