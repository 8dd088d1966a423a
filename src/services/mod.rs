pub mod backup;
pub mod broadcast;
pub mod flows;
pub mod limits;
pub mod packs;
pub mod payments;
pub mod render;
pub mod sessions;
