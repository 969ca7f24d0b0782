//! Map renderer: writes current, future and difference suitability PNGs
//! from an sdm-run report. North is up; missing cells are grey.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use sdm_core::io::read_json;
use sdm_core::{Grid, RunReport};

const MISSING: [u8; 3] = [128, 128, 128];

#[derive(Parser, Debug)]
#[command(name = "visualize", about = "Render suitability maps from an sdm-run report")]
struct Args {
    /// Report written by sdm-run.
    #[arg(short, long, default_value = "output/report.json")]
    report: PathBuf,

    /// Output directory for the PNGs.
    #[arg(short, long, default_value = "output/maps")]
    output: PathBuf,

    /// Pixels per grid cell.
    #[arg(long, default_value = "4")]
    scale: u32,
}

// ── Colour helpers ────────────────────────────────────────────────────────────

/// Suitability [0, 1] → white-to-forest-green ramp.
fn suitability_rgb(v: f32) -> [u8; 3] {
    if v.is_nan() {
        return MISSING;
    }
    let t = v.clamp(0.0, 1.0);
    let r = (255.0 - 221.0 * t) as u8; // 255 → 34
    let g = (255.0 - 116.0 * t) as u8; // 255 → 139
    let b = (255.0 - 221.0 * t) as u8; // 255 → 34
    [r, g, b]
}

/// Change in [-span, span] → red (loss) / white / blue (gain).
fn difference_rgb(d: f32, span: f32) -> [u8; 3] {
    if d.is_nan() {
        return MISSING;
    }
    let t = if span > 0.0 { (d / span).clamp(-1.0, 1.0) } else { 0.0 };
    let fade = (255.0 * (1.0 - t.abs())) as u8;
    if t >= 0.0 {
        [fade, fade, 255]
    } else {
        [255, fade, fade]
    }
}

/// Largest absolute change, used to make the diverging scale symmetric.
fn symmetric_span(grid: &Grid) -> f32 {
    grid.data.iter().filter(|v| !v.is_nan()).fold(0.0f32, |m, v| m.max(v.abs()))
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Grid row 0 is the southern edge, image row 0 the top, so rows flip.
fn render(grid: &Grid, scale: u32, colour: impl Fn(f32) -> [u8; 3]) -> image::RgbImage {
    let scale = scale.max(1);
    let mut img = image::RgbImage::new(grid.width as u32 * scale, grid.height as u32 * scale);
    for r in 0..grid.height {
        let y0 = (grid.height - 1 - r) as u32 * scale;
        for c in 0..grid.width {
            let px = image::Rgb(colour(grid.get(r, c)));
            let x0 = c as u32 * scale;
            for dy in 0..scale {
                for dx in 0..scale {
                    img.put_pixel(x0 + dx, y0 + dy, px);
                }
            }
        }
    }
    img
}

fn save(img: &image::RgbImage, dir: &Path, name: &str) -> Result<()> {
    let path = dir.join(name);
    img.save(&path).with_context(|| format!("saving {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    let report: RunReport =
        read_json(&args.report).with_context(|| format!("reading report {}", args.report.display()))?;

    fs::create_dir_all(&args.output).with_context(|| format!("creating {}", args.output.display()))?;

    save(&render(&report.current.grid, args.scale, suitability_rgb), &args.output, "current.png")?;
    save(&render(&report.future.grid, args.scale, suitability_rgb), &args.output, "future.png")?;

    let span = symmetric_span(&report.difference.grid);
    save(
        &render(&report.difference.grid, args.scale, |d| difference_rgb(d, span)),
        &args.output,
        "difference.png",
    )?;

    println!(
        "AUC {:.3}, {} cells gained, {} lost (span ±{span:.3})",
        report.evaluation.auc, report.range_change.gained, report.range_change.lost
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdm_core::BoundingBox;

    #[test]
    fn palettes_mark_missing_grey() {
        assert_eq!(suitability_rgb(f32::NAN), MISSING);
        assert_eq!(difference_rgb(f32::NAN, 1.0), MISSING);
    }

    #[test]
    fn difference_palette_is_diverging() {
        assert_eq!(difference_rgb(0.0, 1.0), [255, 255, 255]);
        assert_eq!(difference_rgb(1.0, 1.0), [0, 0, 255]);
        assert_eq!(difference_rgb(-1.0, 1.0), [255, 0, 0]);
        assert_eq!(difference_rgb(0.3, 0.0), [255, 255, 255]);
    }

    #[test]
    fn render_puts_north_on_top() {
        let extent = BoundingBox::new(0.0, 1.0, 0.0, 2.0).unwrap();
        let g = Grid::from_data(1, 2, extent, vec![0.0, 1.0]).unwrap();
        let img = render(&g, 2, suitability_rgb);
        assert_eq!(img.dimensions(), (2, 4));
        // Northern row (grid row 1, value 1.0) fills the top of the image.
        assert_eq!(img.get_pixel(0, 0).0, suitability_rgb(1.0));
        assert_eq!(img.get_pixel(1, 3).0, suitability_rgb(0.0));
    }

    #[test]
    fn span_ignores_missing_cells() {
        let extent = BoundingBox::new(0.0, 3.0, 0.0, 1.0).unwrap();
        let g = Grid::from_data(3, 1, extent, vec![0.2, f32::NAN, -0.5]).unwrap();
        assert_eq!(symmetric_span(&g), 0.5);
    }
}
