use std::collections::{BTreeMap, HashMap};

use crate::bridge::VideoTile;
use crate::engine::{SurfaceId, TileId};

/// Active video tiles keyed by tile id, plus the render surfaces bound to them.
#[derive(Debug, Clone, Default)]
pub struct VideoTileRegistry {
    tiles: BTreeMap<TileId, VideoTile>,
    bindings: HashMap<TileId, SurfaceId>,
}

impl VideoTileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by tile id.
    pub fn add_tile(&mut self, tile: VideoTile) {
        self.tiles.insert(tile.tile_id, tile);
    }

    /// Remove a tile if present. Its surface binding, if any, is dropped too;
    /// callers must unbind it from the engine first.
    pub fn remove_tile(&mut self, tile_id: TileId) -> Option<VideoTile> {
        self.bindings.remove(&tile_id);
        self.tiles.remove(&tile_id)
    }

    pub fn tile(&self, tile_id: TileId) -> Option<&VideoTile> {
        self.tiles.get(&tile_id)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &VideoTile> {
        self.tiles.values()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Record a binding. Returns the surface previously bound to the tile.
    pub fn bind(&mut self, tile_id: TileId, surface: SurfaceId) -> Option<SurfaceId> {
        self.bindings.insert(tile_id, surface)
    }

    pub fn unbind(&mut self, tile_id: TileId) -> Option<SurfaceId> {
        self.bindings.remove(&tile_id)
    }

    pub fn binding(&self, tile_id: TileId) -> Option<SurfaceId> {
        self.bindings.get(&tile_id).copied()
    }

    pub fn bound_tiles(&self) -> Vec<TileId> {
        let mut ids: Vec<TileId> = self.bindings.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.bindings.clear();
    }
}
