//! Region cropping and normalization.
//!
//! Crops are tight: no inset beyond the region itself. Values are the
//! sample minus the frame's thermal reference, resampled nearest-neighbour
//! to the classifier's input size.

use crate::classify::backend::Sample;
use crate::frame::Frame;
use crate::track::Rect;

pub fn crop_sample(
    frame: &Frame,
    rect: &Rect,
    thermal_reference: f32,
    out_width: u32,
    out_height: u32,
) -> Option<Sample> {
    if out_width == 0 || out_height == 0 {
        return None;
    }
    let bounds = Rect::new(0, 0, frame.width(), frame.height());
    let crop = rect.intersection(&bounds);
    if crop.is_empty() {
        return None;
    }

    let mut data = Vec::with_capacity(out_width as usize * out_height as usize);
    for oy in 0..out_height {
        let sy = crop.y as u32 + (oy * crop.height) / out_height;
        for ox in 0..out_width {
            let sx = crop.x as u32 + (ox * crop.width) / out_width;
            let value = frame.get(sx, sy)?;
            data.push(value as f32 - thermal_reference);
        }
    }

    Some(Sample {
        width: out_width,
        height: out_height,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Telemetry;

    #[test]
    fn crops_and_subtracts_reference() {
        let samples: Vec<u16> = (0..16).map(|v| 3000 + v).collect();
        let frame = Frame::new(Telemetry::default(), 4, 4, samples).unwrap();
        let sample = crop_sample(&frame, &Rect::new(1, 1, 2, 2), 3000.0, 2, 2).unwrap();
        assert_eq!(sample.data, vec![5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn upsamples_nearest_neighbour() {
        let frame = Frame::new(Telemetry::default(), 2, 1, vec![10, 20]).unwrap();
        let sample = crop_sample(&frame, &Rect::new(0, 0, 2, 1), 0.0, 4, 2).unwrap();
        assert_eq!(sample.data, vec![10.0, 10.0, 20.0, 20.0, 10.0, 10.0, 20.0, 20.0]);
    }

    #[test]
    fn region_outside_frame_is_unavailable() {
        let frame = Frame::filled(Telemetry::default(), 4, 4, 100);
        assert!(crop_sample(&frame, &Rect::new(10, 10, 3, 3), 0.0, 48, 48).is_none());
        assert!(crop_sample(&frame, &Rect::new(1, 1, 0, 3), 0.0, 48, 48).is_none());
    }

    #[test]
    fn partially_outside_region_is_clipped() {
        let frame = Frame::filled(Telemetry::default(), 4, 4, 100);
        let sample = crop_sample(&frame, &Rect::new(-2, -2, 4, 4), 40.0, 3, 3).unwrap();
        assert!(sample.data.iter().all(|&v| v == 60.0));
    }
}
