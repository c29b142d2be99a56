//! Adaptive binarization of the input image.
//!
//! First stage of chessboard detection: each pixel is compared against the
//! mean intensity of a sliding window around it (computed from an integral
//! image), separating dark squares from light squares under uneven
//! illumination. A subsequent erosion of the dark mask disconnects black
//! squares that touch diagonally at the internal corners, so that the
//! candidate-extraction stage sees one connected region per square.

use image::GrayImage;

/// A packed binary mask over the image, `true` marking dark pixels.
#[derive(Debug, Clone)]
pub struct BinaryImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<bool>,
}

impl BinaryImage {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }
}

/// Summed-area table with one extra row/column of zeros, so
/// `sum(x0..x1, y0..y1)` needs no boundary cases.
fn integral_image(img: &GrayImage) -> Vec<u64> {
    let w = img.width() as usize;
    let h = img.height() as usize;
    let stride = w + 1;
    let mut integral = vec![0u64; stride * (h + 1)];

    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += img.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * stride + (x + 1)] = integral[y * stride + (x + 1)] + row_sum;
        }
    }
    integral
}

/// Marks pixels darker than their local window mean minus `bias`.
///
/// `radius` is the half-width of the averaging window; it should be on the
/// order of one square so that the window always spans both dark and light
/// squares.
pub fn adaptive_mean_threshold(img: &GrayImage, radius: usize, bias: f64) -> BinaryImage {
    let w = img.width() as usize;
    let h = img.height() as usize;
    let stride = w + 1;
    let integral = integral_image(img);

    let mut data = vec![false; w * h];
    for y in 0..h {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius + 1).min(w);

            let area = ((x1 - x0) * (y1 - y0)) as f64;
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let mean = sum as f64 / area;

            data[y * w + x] = (img.get_pixel(x as u32, y as u32)[0] as f64) < mean - bias;
        }
    }

    BinaryImage {
        width: w,
        height: h,
        data,
    }
}

/// Fills enclosed light regions of the dark mask.
///
/// When the averaging window fits inside one square, only a band near the
/// square's edges thresholds dark and the interior is left as an enclosed
/// hole. Light pixels are flood-filled from the image border with
/// 8-connectivity (so light squares touching only at corners still reach
/// the background); whatever light remains is enclosed and becomes dark.
pub fn fill_holes(mask: &BinaryImage) -> BinaryImage {
    let w = mask.width;
    let h = mask.height;
    let mut reachable = vec![false; w * h];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    let seed = |x: usize, y: usize, stack: &mut Vec<(usize, usize)>, reachable: &mut Vec<bool>| {
        let idx = y * w + x;
        if !mask.data[idx] && !reachable[idx] {
            reachable[idx] = true;
            stack.push((x, y));
        }
    };

    for x in 0..w {
        seed(x, 0, &mut stack, &mut reachable);
        seed(x, h - 1, &mut stack, &mut reachable);
    }
    for y in 0..h {
        seed(0, y, &mut stack, &mut reachable);
        seed(w - 1, y, &mut stack, &mut reachable);
    }

    while let Some((x, y)) = stack.pop() {
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let nidx = ny as usize * w + nx as usize;
                if !mask.data[nidx] && !reachable[nidx] {
                    reachable[nidx] = true;
                    stack.push((nx as usize, ny as usize));
                }
            }
        }
    }

    let data = (0..w * h).map(|i| mask.data[i] || !reachable[i]).collect();

    BinaryImage {
        width: w,
        height: h,
        data,
    }
}

/// Shrinks the dark mask by one pixel per iteration (3x3 erosion).
///
/// Border pixels are treated as light, so dark regions touching the image
/// edge erode from that side as well.
pub fn erode_dark(mask: &BinaryImage, iterations: usize) -> BinaryImage {
    let w = mask.width;
    let h = mask.height;
    let mut current = mask.data.clone();

    for _ in 0..iterations {
        let mut next = vec![false; w * h];
        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                if !current[y * w + x] {
                    continue;
                }
                let mut keep = true;
                'window: for dy in 0..3 {
                    for dx in 0..3 {
                        if !current[(y + dy - 1) * w + (x + dx - 1)] {
                            keep = false;
                            break 'window;
                        }
                    }
                }
                next[y * w + x] = keep;
            }
        }
        current = next;
    }

    BinaryImage {
        width: w,
        height: h,
        data: current,
    }
}
