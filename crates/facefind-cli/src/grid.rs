//! Result display: a column grid for the terminal and a contact-sheet image.

use facefind_core::{load_rgb, BoundingBox, FaceMatch, ImageError};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

const SHEET_BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);
const FACE_OUTLINE: Rgb<u8> = Rgb([64, 200, 96]);
const CELL_GAP: u32 = 8;

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Lay matches out `columns` per row, each cell showing file name and distance.
pub fn terminal_grid(matches: &[FaceMatch], columns: usize) -> String {
    let columns = columns.max(1);
    let cells: Vec<String> = matches
        .iter()
        .map(|m| format!("{} ({:.3})", display_name(&m.path), m.distance))
        .collect();
    let width = cells.iter().map(|c| c.chars().count()).max().unwrap_or(0);

    cells
        .chunks(columns)
        .map(|row| {
            row.iter()
                .map(|c| format!("{c:<width$}"))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pixel origin of cell `index` in a sheet `columns` wide.
fn cell_origin(index: usize, columns: usize, cell: u32) -> (u32, u32) {
    let col = (index % columns) as u32;
    let row = (index / columns) as u32;
    (CELL_GAP + col * (cell + CELL_GAP), CELL_GAP + row * (cell + CELL_GAP))
}

fn sheet_size(count: usize, columns: usize, cell: u32) -> (u32, u32) {
    let cols = count.clamp(1, columns) as u32;
    let rows = count.div_ceil(columns).max(1) as u32;
    (
        CELL_GAP + cols * (cell + CELL_GAP),
        CELL_GAP + rows * (cell + CELL_GAP),
    )
}

/// Draw a rectangle outline, clipped to the image.
fn outline(img: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, thickness: i64, color: Rgb<u8>) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let edge = x - x0 < thickness || x1 - x < thickness || y - y0 < thickness || y1 - y < thickness;
            if edge && x >= 0 && y >= 0 && x < w && y < h {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// Scale an image to fit a `cell`×`cell` square, outlining the matched face.
fn thumbnail(image: &RgbImage, face: Option<&BoundingBox>, cell: u32) -> RgbImage {
    let scale = (cell as f32 / image.width() as f32).min(cell as f32 / image.height() as f32);
    let w = ((image.width() as f32 * scale).round() as u32).clamp(1, cell);
    let h = ((image.height() as f32 * scale).round() as u32).clamp(1, cell);
    let mut thumb = imageops::resize(image, w, h, FilterType::Triangle);

    if let Some(b) = face {
        outline(
            &mut thumb,
            (b.x * scale) as i64,
            (b.y * scale) as i64,
            ((b.x + b.width) * scale) as i64,
            ((b.y + b.height) * scale) as i64,
            2,
            FACE_OUTLINE,
        );
    }
    thumb
}

/// Render matches as a grid of thumbnails.
///
/// Images that fail to load leave an empty cell and are returned alongside
/// the sheet.
pub fn contact_sheet(
    matches: &[FaceMatch],
    columns: usize,
    cell: u32,
) -> (RgbImage, Vec<(PathBuf, ImageError)>) {
    let columns = columns.max(1);
    let (w, h) = sheet_size(matches.len(), columns, cell);
    let mut sheet = RgbImage::from_pixel(w, h, SHEET_BACKGROUND);
    let mut failures = Vec::new();

    for (i, m) in matches.iter().enumerate() {
        let image = match load_rgb(&m.path) {
            Ok(img) if img.width() > 0 && img.height() > 0 => img,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(path = %m.path.display(), error = %e, "could not load image for contact sheet");
                failures.push((m.path.clone(), e));
                continue;
            }
        };

        let thumb = thumbnail(&image, Some(&m.face), cell);
        let (cx, cy) = cell_origin(i, columns, cell);
        let x = cx + (cell - thumb.width()) / 2;
        let y = cy + (cell - thumb.height()) / 2;
        imageops::overlay(&mut sheet, &thumb, x as i64, y as i64);
    }

    (sheet, failures)
}
