//! Synthetic entity feed for the demo.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use transit_overlay::{EntityRecord, GeoBounds, GeoPoint, RouteId};

/// Paint colors handed out to some vehicles; the rest use their route color.
const PALETTE: [&str; 5] = ["#e63946", "#f4a261", "#2a9d8f", "#457b9d", "#8338ec"];

/// Every fourth vehicle roams freely instead of following a route.
const FREE_ROAM_EVERY: usize = 4;

/// Generates snapshots of a fleet that changes membership over time.
pub struct Fleet {
    rng: StdRng,
    bounds: GeoBounds,
    next_id: usize,
    records: Vec<EntityRecord>,
}

impl Fleet {
    pub fn new(seed: u64, size: usize, bounds: GeoBounds) -> Self {
        let mut fleet = Self {
            rng: StdRng::seed_from_u64(seed),
            bounds,
            next_id: 0,
            records: Vec::with_capacity(size),
        };
        for _ in 0..size {
            let record = fleet.spawn();
            fleet.records.push(record);
        }
        fleet
    }

    fn spawn(&mut self) -> EntityRecord {
        let index = self.next_id;
        self.next_id += 1;
        let id = format!("veh-{index:03}");
        let color = self
            .rng
            .random_bool(0.4)
            .then(|| PALETTE[self.rng.random_range(0..PALETTE.len())].to_string());

        if index % FREE_ROAM_EVERY == FREE_ROAM_EVERY - 1 {
            let b = self.bounds;
            let position = GeoPoint::new(
                self.rng.random_range(b.west..=b.east),
                self.rng.random_range(b.south..=b.north),
            );
            return EntityRecord {
                label: format!("Shuttle {index}"),
                position: Some(position),
                heading: Some(self.rng.random_range(0.0..360.0)),
                moving: true,
                // Degrees per tick.
                speed: self.rng.random_range(0.000_5..0.002),
                color,
                id,
                ..Default::default()
            };
        }

        let route = RouteId::ALL[index % RouteId::ALL.len()];
        EntityRecord {
            label: format!("Coach {index}"),
            route_id: Some(route.as_str().to_string()),
            progress: Some(self.rng.random_range(0.0..1.0)),
            moving: self.rng.random_bool(0.85),
            // Route fraction per second.
            speed: self.rng.random_range(0.002..0.01),
            color,
            id,
            ..Default::default()
        }
    }

    /// Retire one vehicle and commission a new one.
    pub fn rotate(&mut self) {
        if !self.records.is_empty() {
            let retired = self.rng.random_range(0..self.records.len());
            let record = self.records.swap_remove(retired);
            tracing::info!(id = %record.id, "vehicle retired");
        }
        let record = self.spawn();
        tracing::info!(id = %record.id, "vehicle commissioned");
        self.records.push(record);
    }

    pub fn snapshot(&self) -> Vec<EntityRecord> {
        self.records.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_is_deterministic() {
        let a = Fleet::new(7, 12, GeoBounds::default()).snapshot();
        let b = Fleet::new(7, 12, GeoBounds::default()).snapshot();
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_eq!(a.iter().filter(|r| r.position.is_some()).count(), 3);
    }

    #[test]
    fn test_rotate_keeps_size_and_ids_unique() {
        let mut fleet = Fleet::new(1, 5, GeoBounds::default());
        for _ in 0..10 {
            fleet.rotate();
        }
        let snapshot = fleet.snapshot();
        assert_eq!(snapshot.len(), 5);
        let mut ids: Vec<_> = snapshot.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }
}
