mod deconv;
mod efficient_pw_conv;
mod efficient_pyr_pool;

pub use deconv::*;
pub use efficient_pw_conv::*;
pub use efficient_pyr_pool::*;
