pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Euclidean distance between two rendered pixels.
pub fn pixel_distance(a: &[u8], b: &[u8]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Mean pairwise distance between two groups of pixels; pairs of a pixel
/// with itself are skipped.
pub fn mean_group_distance(pixels: &[&[u8]], a: &[usize], b: &[usize]) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for &i in a {
        for &k in b {
            if i == k {
                continue;
            }
            total += pixel_distance(pixels[i], pixels[k]);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}
