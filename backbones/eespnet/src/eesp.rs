//! EESP unit and the strided down-sampling block built on it.

use burn::{
    nn::{
        pool::{AvgPool2d, AvgPool2dConfig},
        PRelu, PaddingConfig2d,
    },
    prelude::*,
};
use burn_extra_ops::pool_to_match;

use crate::{
    error::{EESPNetError, EESPNetResult},
    layers::{prelu, Br, BrConfig, CDilated, CDilatedConfig, Cb, CbConfig, Cbr, CbrConfig},
};

/// How a strided EESP unit is used.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum DownMethod {
    /// The unit runs next to an average pool inside a [`DownSampler`];
    /// it returns its expanded features without residual or activation.
    Avg,
    /// The unit stands alone.
    Esp,
}

/// Configuration for an [`Eesp`] unit.
#[derive(Config, Debug)]
pub struct EespConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    #[config(default = "1")]
    pub stride: usize,
    /// Number of parallel dilated branches.
    #[config(default = "4")]
    pub branches: usize,
    /// Largest effective kernel size a branch may have.
    #[config(default = "7")]
    pub r_lim: usize,
    #[config(default = "DownMethod::Esp")]
    pub down_method: DownMethod,
}

impl EespConfig {
    /// Dilation rate of every branch, ascending.
    ///
    /// Branch `i` would see a `(3 + 2i)` receptive field; anything above
    /// `r_lim` collapses back to a plain 3x3.
    pub fn dilations(&self) -> Vec<usize> {
        let mut kernel_sizes: Vec<usize> = (0..self.branches)
            .map(|i| 3 + 2 * i)
            .map(|k| if k <= self.r_lim { k } else { 3 })
            .collect();
        kernel_sizes.sort_unstable();
        kernel_sizes.into_iter().map(|k| (k - 1) / 2).collect()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> EESPNetResult<Eesp<B>> {
        let branches = self.branches;
        let width = self.out_channels / branches.max(1);
        // proj_1x1 is grouped by `branches` on both sides
        if branches == 0
            || width == 0
            || width * branches != self.out_channels
            || width % branches != 0
            || self.in_channels % branches != 0
        {
            return Err(EESPNetError::InvalidBranching {
                out_channels: self.out_channels,
                branches,
            });
        }

        let spp_dw = self
            .dilations()
            .into_iter()
            .map(|dilation| {
                CDilatedConfig::new(width, width, 3)
                    .with_stride(self.stride)
                    .with_dilation(dilation)
                    .with_groups(width)
                    .init(device)
            })
            .collect();

        Ok(Eesp {
            proj_1x1: CbrConfig::new(self.in_channels, width, 1)
                .with_groups(branches)
                .init(device),
            spp_dw,
            conv_1x1_exp: CbConfig::new(self.out_channels, self.out_channels, 1)
                .with_groups(branches)
                .init(device),
            br_after_cat: BrConfig::new(self.out_channels).init(device),
            module_act: prelu(self.out_channels, device),
            return_expanded: self.stride == 2 && self.down_method == DownMethod::Avg,
        })
    }
}

/// Extremely Efficient Spatial Pyramid unit.
///
/// A grouped point-wise projection feeds `k` depth-wise dilated branches whose
/// outputs are summed hierarchically before concatenation, which removes the
/// gridding artefacts of plain dilated pyramids.
#[derive(Module, Debug)]
pub struct Eesp<B: Backend> {
    pub proj_1x1: Cbr<B>,
    pub spp_dw: Vec<CDilated<B>>,
    pub conv_1x1_exp: Cb<B>,
    pub br_after_cat: Br<B>,
    pub module_act: PRelu<B>,
    return_expanded: bool,
}

impl<B: Backend> Eesp<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let projected = self.proj_1x1.forward(input.clone());

        let mut outputs: Vec<Tensor<B, 4>> = Vec::with_capacity(self.spp_dw.len());
        for branch in &self.spp_dw {
            let out = branch.forward(projected.clone());
            let out = match outputs.last() {
                Some(previous) => out + previous.clone(),
                None => out,
            };
            outputs.push(out);
        }

        let expanded = self
            .conv_1x1_exp
            .forward(self.br_after_cat.forward(Tensor::cat(outputs, 1)));

        if self.return_expanded {
            return expanded;
        }

        let expanded = if expanded.dims() == input.dims() {
            expanded + input
        } else {
            expanded
        };
        self.module_act.forward(expanded)
    }
}

/// Configuration for a [`DownSampler`].
#[derive(Config, Debug)]
pub struct DownSamplerConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    #[config(default = "4")]
    pub branches: usize,
    #[config(default = "9")]
    pub r_lim: usize,
    /// Add a projection of the pooled RGB image to the output.
    #[config(default = "true")]
    pub reinforce: bool,
    /// Channels of the reinforcing image.
    #[config(default = "3")]
    pub image_channels: usize,
}

impl DownSamplerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EESPNetResult<DownSampler<B>> {
        if self.out_channels <= self.in_channels {
            return Err(EESPNetError::InvalidBranching {
                out_channels: self.out_channels.saturating_sub(self.in_channels),
                branches: self.branches,
            });
        }

        let eesp = EespConfig::new(self.in_channels, self.out_channels - self.in_channels)
            .with_stride(2)
            .with_branches(self.branches)
            .with_r_lim(self.r_lim)
            .with_down_method(DownMethod::Avg)
            .init(device)?;

        let inp_reinf = self.reinforce.then(|| InputReinforcement {
            cbr: CbrConfig::new(self.image_channels, self.image_channels, 3).init(device),
            cb: CbConfig::new(self.image_channels, self.out_channels, 1).init(device),
        });

        Ok(DownSampler {
            avg: avg_pool_stride2(),
            eesp,
            inp_reinf,
            act: prelu(self.out_channels, device),
        })
    }
}

/// 3x3 average pool with stride 2 and padding 1.
pub(crate) fn avg_pool_stride2() -> AvgPool2d {
    AvgPool2dConfig::new([3, 3])
        .with_strides([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init()
}

/// Projection of the input image added at every down-sampling stage.
#[derive(Module, Debug)]
pub struct InputReinforcement<B: Backend> {
    pub cbr: Cbr<B>,
    pub cb: Cb<B>,
}

impl<B: Backend> InputReinforcement<B> {
    pub fn forward(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        self.cb.forward(self.cbr.forward(image))
    }
}

/// Strided EESP unit in parallel with an average pool.
#[derive(Module, Debug)]
pub struct DownSampler<B: Backend> {
    pub avg: AvgPool2d,
    pub eesp: Eesp<B>,
    pub inp_reinf: Option<InputReinforcement<B>>,
    pub act: PRelu<B>,
}

impl<B: Backend> DownSampler<B> {
    /// Halves the resolution of `input`.
    ///
    /// When `image` is given and the block was built with input
    /// reinforcement, the image is pooled down to the output size, projected
    /// and added before the activation.
    pub fn forward(&self, input: Tensor<B, 4>, image: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        let avg_out = self.avg.forward(input.clone());
        let eesp_out = self.eesp.forward(input);
        let [_, _, height, width] = avg_out.dims();
        let output = Tensor::cat(vec![avg_out, eesp_out], 1);

        let output = match (&self.inp_reinf, image) {
            (Some(reinf), Some(image)) => {
                let image = pool_to_match(image, &self.avg, [height, width]);
                output + reinf.forward(image)
            }
            _ => output,
        };
        self.act.forward(output)
    }
}
