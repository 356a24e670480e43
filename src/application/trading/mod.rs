pub mod placer;
pub mod protection;
pub mod reconciler;
