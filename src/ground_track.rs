use crate::geometry::LonLat;

/// A jump in longitude larger than this between consecutive samples means the
/// track wrapped around the antimeridian.
const MAX_LONGITUDE_STEP: f64 = 180.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathMarker {
    /// Index of the sample in the predicted sequence.
    pub index: usize,
    pub position: LonLat,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundTrack {
    pub segments: Vec<Vec<LonLat>>,
    pub markers: Vec<PathMarker>,
}

impl GroundTrack {
    pub fn first_point(&self) -> Option<LonLat> {
        self.segments.first().and_then(|s| s.first()).copied()
    }
}

/// Splits chronologically ordered sub-satellite points into polylines that
/// never cross the antimeridian, and places a marker on every
/// `marker_stride`-th point that ended up inside one of them.
pub fn segment(points: &[LonLat], marker_stride: usize) -> GroundTrack {
    let mut segments: Vec<Vec<LonLat>> = Vec::new();
    // Whether each input point belongs to an emitted segment.
    let mut drawn = vec![false; points.len()];

    let mut current: Vec<LonLat> = Vec::new();
    let mut current_start = 0;

    for (i, point) in points.iter().enumerate() {
        if let Some(last) = current.last() {
            if (point.lon - last.lon).abs() > MAX_LONGITUDE_STEP {
                if current.len() > 1 {
                    drawn[current_start..i].iter_mut().for_each(|d| *d = true);
                    segments.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
                current_start = i;
            }
        }
        current.push(*point);
    }

    if current.len() > 1 {
        drawn[current_start..].iter_mut().for_each(|d| *d = true);
        segments.push(current);
    }

    let markers = if marker_stride == 0 {
        Vec::new()
    } else {
        points
            .iter()
            .enumerate()
            .step_by(marker_stride)
            .filter(|(i, _)| drawn[*i])
            .map(|(index, position)| PathMarker {
                index,
                position: *position,
            })
            .collect()
    };

    GroundTrack { segments, markers }
}
