use dvs_calib_core::{ObservationPair, Pt2, Pt3};

/// Ordered observations of the calibration pattern for one camera.
///
/// Observations are only ever appended or dropped all at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternStore {
    observations: Vec<ObservationPair>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, observation: ObservationPair) {
        self.observations.push(observation);
    }

    pub fn reset(&mut self) {
        self.observations.clear();
    }

    pub fn count(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[ObservationPair] {
        &self.observations
    }

    /// Split into the per-view point lists handed to a solver.
    pub fn solver_inputs(&self) -> (Vec<Vec<Pt3>>, Vec<Vec<Pt2>>) {
        self.observations
            .iter()
            .map(|obs| (obs.world_points.clone(), obs.image_points.clone()))
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(offset: f64) -> ObservationPair {
        ObservationPair::new(
            vec![Pt2::new(offset, 0.0), Pt2::new(offset + 1.0, 0.0)],
            vec![Pt3::new(0.0, 0.0, 0.0), Pt3::new(1.0, 0.0, 0.0)],
        )
        .unwrap()
    }

    #[test]
    fn count_tracks_appends_and_reset() {
        for n in 0..6 {
            let mut store = PatternStore::new();
            for i in 0..n {
                store.append(observation(i as f64));
            }
            assert_eq!(store.count(), n);

            store.reset();
            assert_eq!(store.count(), 0);
            assert!(store.is_empty());
        }
    }

    #[test]
    fn reset_is_idempotent() {
        let mut once = PatternStore::new();
        once.append(observation(0.0));
        let mut twice = once.clone();

        once.reset();
        twice.reset();
        twice.reset();
        assert_eq!(once, twice);
    }

    #[test]
    fn solver_inputs_keep_observation_order() {
        let mut store = PatternStore::new();
        store.append(observation(10.0));
        store.append(observation(20.0));

        let (object_points, image_points) = store.solver_inputs();
        assert_eq!(object_points.len(), 2);
        assert_eq!(image_points[0][0], Pt2::new(10.0, 0.0));
        assert_eq!(image_points[1][0], Pt2::new(20.0, 0.0));
        assert_eq!(object_points[1], store.observations()[1].world_points);
    }
}
