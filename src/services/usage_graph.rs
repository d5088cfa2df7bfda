use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgb, RgbImage};

use crate::error::Result;
use crate::services::statistics::VisitorsAtTime;

const BAR_WIDTH: u32 = 8;
const BAR_GAP: u32 = 2;
const PIXELS_PER_VISITOR: u32 = 12;
const MARGIN: u32 = 10;
const MIN_HEIGHT: u32 = 60;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const BAR: Rgb<u8> = Rgb([33, 150, 243]);
const DAY_MARK: Rgb<u8> = Rgb([200, 200, 200]);

/// Renders the hourly occupancy as a PNG bar chart, one bar per hour with a
/// grey line at the start of each day.
pub fn render_usage_png(points: &[VisitorsAtTime], hours_per_day: usize) -> Result<Vec<u8>> {
    let peak = points.iter().map(|p| p.num_visitors).max().unwrap_or(0) as u32;
    let bars = points.len().max(1) as u32;

    let width = MARGIN * 2 + bars * (BAR_WIDTH + BAR_GAP);
    let height = (MARGIN * 2 + peak * PIXELS_PER_VISITOR).max(MIN_HEIGHT);
    let baseline = height - MARGIN;

    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    for (idx, point) in points.iter().enumerate() {
        let left = MARGIN + idx as u32 * (BAR_WIDTH + BAR_GAP);

        if hours_per_day > 0 && idx % hours_per_day == 0 {
            for y in MARGIN..baseline {
                img.put_pixel(left.saturating_sub(1), y, DAY_MARK);
            }
        }

        let bar_height = point.num_visitors as u32 * PIXELS_PER_VISITOR;
        for x in left..left + BAR_WIDTH {
            for y in baseline - bar_height..baseline {
                img.put_pixel(x, y, BAR);
            }
        }
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(img.as_raw(), width, height, ColorType::Rgb8)?;
    Ok(png)
}
