//! Control bytes and fixed tokens of the MicroPython REPL.
//!
//! The device emits these sequences verbatim; matching is byte-exact.

/// CTRL-A: enter raw REPL.
pub const RAW_START: u8 = 0x01;
/// CTRL-B: leave raw REPL, back to the friendly REPL.
pub const NORMAL: u8 = 0x02;
/// CTRL-C: keyboard interrupt.
pub const INTERRUPT: u8 = 0x03;
/// CTRL-D: soft reboot in the friendly REPL.
pub const REBOOT: u8 = 0x04;
/// CTRL-D: submit the buffered program in raw REPL.
pub const RAW_SUBMIT: u8 = 0x04;
/// CTRL-D with an empty buffer: soft reset in raw REPL.
pub const RAW_RESET: u8 = 0x04;
/// Carriage return.
pub const ENTER: u8 = b'\r';

/// Drop to the friendly REPL, then interrupt twice to stop any program.
pub const STOP: &[u8] = &[NORMAL, ENTER, INTERRUPT, INTERRUPT];

/// Empty program submission; answered with [`COMMAND_END`].
pub const RAW_NULL: &[u8] = &[ENTER, RAW_SUBMIT];

/// Banner printed on raw REPL entry, including the trailing prompt.
pub const RAW_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";

/// Raw REPL prompt.
pub const RAW_PROMPT: &[u8] = b">";

/// Acknowledgement of a raw REPL submission.
pub const RAW_OK: &[u8] = b"OK";

/// Terminates a raw program's stdout.
pub const OUTPUT_END: &[u8] = &[RAW_SUBMIT];

/// Terminates a raw program's exception text, followed by the prompt.
pub const COMMAND_END: &[u8] = &[RAW_SUBMIT, b'>'];

/// Sequence sent to probe the device state: space, submit, enter.
pub const STATE_PROBE: &[u8] = &[b' ', RAW_SUBMIT, ENTER];

/// Substring of a running firmware's reply to an unknown command.
pub const RUNNING_MARKER: &[u8] = b"\"error\"";

/// Raw REPL reply to a probe: ack, empty stdout, empty exception.
pub const RAW_MARKER: &[u8] = &[b'O', b'K', RAW_SUBMIT, RAW_SUBMIT];

/// Friendly REPL prompt.
pub const REPL_MARKER: &[u8] = b">>>";

/// Substring of the exception raised when a remote file does not exist.
pub const NOT_FOUND_MARKER: &str = "ENOENT";
