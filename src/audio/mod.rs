//! Audio assembly: subprocess driver and program assembler.

pub mod assembler;
pub mod ffmpeg;

pub use assembler::{
    AssembledAudio, AssemblyInput, AudioAssembler, ProgramTags, SegmentAudio,
};
pub use ffmpeg::{FfmpegTool, MediaRunner};
