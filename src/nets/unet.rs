use super::{norm_act, parse_args, Args, BoxedModule};
use crate::error::{Error, Result};
use candle_core::{Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig, VarBuilder};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct UNetArgs {
    #[serde(default = "default_spatial_dims", alias = "dimensions")]
    pub spatial_dims: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub channels: Vec<usize>,
    pub strides: Vec<usize>,
}

fn default_spatial_dims() -> usize {
    2
}

impl UNetArgs {
    fn validate(&self) -> Result<()> {
        if self.spatial_dims != 2 {
            return Err(Error::ConfigError(format!(
                "UNet supports spatial_dims=2 only, got {}",
                self.spatial_dims
            )));
        }
        if self.channels.len() < 2 {
            return Err(Error::ConfigError(
                "UNet needs at least two channel levels".to_string(),
            ));
        }
        if self.strides.len() != self.channels.len() - 1 {
            return Err(Error::ConfigError(format!(
                "UNet expects {} strides for {} channel levels, got {}",
                self.channels.len() - 1,
                self.channels.len(),
                self.strides.len()
            )));
        }
        if self.strides.contains(&0) {
            return Err(Error::ConfigError("UNet strides must be positive".to_string()));
        }
        Ok(())
    }
}

/// Encoder-decoder with skip connections. Each encoder level downsamples by
/// its stride; the matching decoder level upsamples by the same stride.
#[derive(Debug)]
pub struct UNet {
    down: Vec<Conv2d>,
    bottom: Conv2d,
    up: Vec<ConvTranspose2d>,
}

impl UNet {
    pub fn new(args: &UNetArgs, vb: VarBuilder) -> Result<Self> {
        args.validate()?;

        let ch = &args.channels;
        let levels = ch.len() - 1;

        let mut down = Vec::with_capacity(levels);
        let mut in_channels = args.in_channels;
        for (i, &stride) in args.strides.iter().enumerate() {
            let cfg = Conv2dConfig {
                padding: 1,
                stride,
                ..Default::default()
            };
            down.push(candle_nn::conv2d(in_channels, ch[i], 3, cfg, vb.pp("down").pp(i))?);
            in_channels = ch[i];
        }

        let bottom_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let bottom = candle_nn::conv2d(ch[levels - 1], ch[levels], 3, bottom_cfg, vb.pp("bottom"))?;

        let mut up = Vec::with_capacity(levels);
        for (i, &stride) in args.strides.iter().enumerate() {
            let from_below = if i == levels - 1 { ch[levels] } else { ch[i] };
            let out_channels = if i == 0 { args.out_channels } else { ch[i - 1] };
            let cfg = ConvTranspose2dConfig {
                padding: 1,
                output_padding: stride - 1,
                stride,
                ..Default::default()
            };
            up.push(candle_nn::conv_transpose2d(
                ch[i] + from_below,
                out_channels,
                3,
                cfg,
                vb.pp("up").pp(i),
            )?);
        }

        Ok(Self { down, bottom, up })
    }
}

impl Module for UNet {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut skips = Vec::with_capacity(self.down.len());
        let mut h = xs.clone();
        for conv in &self.down {
            h = norm_act(&conv.forward(&h)?)?;
            skips.push(h.clone());
        }

        h = norm_act(&self.bottom.forward(&h)?)?;

        for (i, conv) in self.up.iter().enumerate().rev() {
            h = conv.forward(&Tensor::cat(&[&skips[i], &h], 1)?)?;
            if i > 0 {
                h = norm_act(&h)?;
            }
        }
        Ok(h)
    }
}

pub fn build(args: &Args, vb: VarBuilder) -> Result<BoxedModule> {
    let args: UNetArgs = parse_args("UNet", args)?;
    Ok(Box::new(UNet::new(&args, vb)?))
}
