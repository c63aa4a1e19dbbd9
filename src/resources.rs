//! Buffers sized to the current sensor geometry.

use log::debug;

use crate::demod::ResultMap;
use crate::error::{Result, SimError};
use crate::grid::{Grid, Texel};
use crate::params::SimulatorParams;
use crate::phase::PhaseAccumulator;
use crate::reduce::{MaskGeometry, PixelApertureMask};

/// Everything that decides buffer sizes or mask weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceKey {
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub mask: MaskGeometry,
}

impl ResourceKey {
    pub fn from_params(params: &SimulatorParams) -> Self {
        Self {
            sensor_width: params.sensor_width,
            sensor_height: params.sensor_height,
            mask: MaskGeometry::from_params(params),
        }
    }
}

pub struct ResourceCache {
    key: Option<ResourceKey>,
    pub oversampled: Grid<Texel>,
    pub reduced: Grid<Texel>,
    pub phases: PhaseAccumulator,
    pub result: ResultMap,
    pub mask: PixelApertureMask,
    in_frame: bool,
}

impl ResourceCache {
    pub fn new(params: &SimulatorParams) -> Self {
        let mut cache = Self {
            key: None,
            oversampled: Grid::new(0, 0),
            reduced: Grid::new(0, 0),
            phases: PhaseAccumulator::new(0, 0),
            result: Grid::new(0, 0),
            mask: PixelApertureMask::new(MaskGeometry::from_params(params)),
            in_frame: false,
        };
        cache.rebuild(params);
        cache
    }

    pub fn key(&self) -> Option<ResourceKey> {
        self.key
    }

    /// Bring the buffers in line with `params`. Returns whether anything was
    /// rebuilt. Only allowed between frames.
    pub fn sync(&mut self, params: &SimulatorParams) -> Result<bool> {
        if self.in_frame {
            return Err(SimError::FrameInProgress);
        }
        if self.key == Some(ResourceKey::from_params(params)) {
            return Ok(false);
        }
        self.rebuild(params);
        Ok(true)
    }

    fn rebuild(&mut self, params: &SimulatorParams) {
        let key = ResourceKey::from_params(params);
        let (w, h) = (params.sensor_width as usize, params.sensor_height as usize);
        let (mw, mh) = (params.map_width() as usize, params.map_height() as usize);
        debug!(
            "rebuilding frame resources: sensor {}x{}, map {}x{}",
            w, h, mw, mh
        );
        self.oversampled.resize(mw, mh);
        self.reduced.resize(w, h);
        self.phases.resize(w, h);
        self.result.resize(w, h);
        if self.key.map(|k| k.mask) != Some(key.mask) {
            self.mask = PixelApertureMask::new(key.mask);
        }
        self.key = Some(key);
    }

    pub fn begin_frame(&mut self) {
        self.in_frame = true;
    }

    pub fn end_frame(&mut self) {
        self.in_frame = false;
    }

    pub fn in_frame(&self) -> bool {
        self.in_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulatorParams {
        SimulatorParams {
            sensor_width: 4,
            sensor_height: 3,
            pixel_width: 3,
            pixel_height: 5,
            ..SimulatorParams::default()
        }
    }

    #[test]
    fn test_buffers_follow_params() {
        let cache = ResourceCache::new(&small());
        assert_eq!((cache.oversampled.width(), cache.oversampled.height()), (12, 15));
        assert_eq!((cache.reduced.width(), cache.reduced.height()), (4, 3));
        assert_eq!((cache.phases.width(), cache.phases.height()), (4, 3));
        assert_eq!((cache.mask.weights().width(), cache.mask.weights().height()), (3, 5));
    }

    #[test]
    fn test_sync_only_rebuilds_on_change() {
        let mut params = small();
        let mut cache = ResourceCache::new(&params);
        assert!(!cache.sync(&params).unwrap());
        params.contrast = 0.5;
        assert!(!cache.sync(&params).unwrap());
        params.pixel_mask_width = 0.25;
        assert!(cache.sync(&params).unwrap());
        params.sensor_width = 6;
        assert!(cache.sync(&params).unwrap());
        assert_eq!(cache.result.width(), 6);
    }

    #[test]
    fn test_sync_refused_mid_frame() {
        let mut params = small();
        let mut cache = ResourceCache::new(&params);
        cache.begin_frame();
        params.sensor_height = 7;
        assert!(matches!(cache.sync(&params), Err(SimError::FrameInProgress)));
        assert_eq!(cache.reduced.height(), 3);
        cache.end_frame();
        assert!(cache.sync(&params).unwrap());
    }
}
