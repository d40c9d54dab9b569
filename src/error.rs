use crate::{
    dasmtx::DasmtxError, doppler::DopplerError, genscat::GenscatError, io::IoError,
    param::ParamError, pfield::PfieldError, signal::SignalError, simus::SimusError,
    txdelay::TxDelayError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `param` module")]
    Param(#[from] ParamError),
    #[error("Error in the `txdelay` module")]
    TxDelay(#[from] TxDelayError),
    #[error("Error in the `genscat` module")]
    Genscat(#[from] GenscatError),
    #[error("Error in the `pfield` module")]
    Pfield(#[from] PfieldError),
    #[error("Error in the `simus` module")]
    Simus(#[from] SimusError),
    #[error("Error in the `dasmtx` module")]
    Dasmtx(#[from] DasmtxError),
    #[error("Error in the `signal` module")]
    Signal(#[from] SignalError),
    #[error("Error in the `doppler` module")]
    Doppler(#[from] DopplerError),
    #[error("Error in the `io` module")]
    Io(#[from] IoError),
    #[cfg(feature = "plot")]
    #[error("Error in the `plot` module")]
    Plot(#[from] crate::plot::PlotError),
}
