pub const DEFAULT_LATENT_DIM: usize = 512;
pub const DEFAULT_NUM_BLOCKS: usize = 2;
pub const DEFAULT_NUM_LAYERS: usize = 1;
/// Output channels of the median heads: median, positive and negative residual.
pub const MEDIAN_CHANNELS: usize = 3;
/// Smallest latent width that still leaves a useful half for the coupling transitions.
pub const MIN_USEFUL_LATENT_DIM: usize = 4;
