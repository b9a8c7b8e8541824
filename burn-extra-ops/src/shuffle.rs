//! # Channel Shuffle
//!
//! Interleaves channels across groups, as introduced by ShuffleNet. ESPNetv2
//! uses it after concatenating the pyramid branches so that the grouped
//! convolution that follows sees a channel from every branch.

use burn::prelude::*;

/// Configuration for the [`ChannelShuffle`] module.
#[derive(Config, Debug)]
pub struct ChannelShuffleConfig {
    /// Number of groups the channel axis is split into.
    pub groups: usize,
}

impl ChannelShuffleConfig {
    /// Initializes a new `ChannelShuffle` module.
    pub const fn init(&self) -> ChannelShuffle {
        ChannelShuffle {
            groups: self.groups,
        }
    }
}

/// Stateless channel shuffle layer.
#[derive(Module, Clone, Debug)]
pub struct ChannelShuffle {
    groups: usize,
}

impl ChannelShuffle {
    /// Shuffles the channel axis of a `[batch, channels, height, width]` tensor.
    ///
    /// # Panics
    /// Panics if `channels` is not divisible by the configured number of groups.
    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        channel_shuffle(x, self.groups)
    }

    /// Number of groups.
    pub const fn groups(&self) -> usize {
        self.groups
    }
}

/// Functional form of [`ChannelShuffle`].
///
/// `[N, C, H, W] -> [N, g, C/g, H, W] -> swap(1, 2) -> [N, C, H, W]`
pub fn channel_shuffle<B: Backend>(x: Tensor<B, 4>, groups: usize) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();
    assert!(
        groups > 0 && channels % groups == 0,
        "channel_shuffle: {channels} channels cannot be split into {groups} groups"
    );
    if groups == 1 {
        return x;
    }

    x.reshape([batch, groups, channels / groups, height, width])
        .swap_dims(1, 2)
        .reshape([batch, channels, height, width])
}
