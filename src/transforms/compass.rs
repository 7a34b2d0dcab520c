const POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// 16-point compass name for a bearing in degrees.
pub fn direction(degrees: f64) -> &'static str {
    let normalized = degrees.rem_euclid(360.0);
    let idx = ((normalized / 22.5) + 0.5).floor() as usize % POINTS.len();
    POINTS[idx]
}
