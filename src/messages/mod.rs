// Helper functions to send one-off protocol messages and handle TcpStream (TCP socket).

// Declare submodules
pub mod config_socket;
pub mod constants;
pub mod error;
pub mod extended;
pub mod protocol;
pub mod socket;
pub mod types;

// Re-export public items
pub use config_socket::{configure_tcp_socket, configure_tcp_socket_for_cancel};
pub use error::{PgErrorMsg, Severity};
pub use extended::{Bind, Close, Describe, Execute, Parse, Target};
pub use protocol::{
    auth_ok, backend_key_data, bind_complete, close_complete, command_complete, data_row,
    empty_query_response, error_message, error_response_terminal, md5_challenge,
    md5_hash_password, md5_hash_second_pass, no_data, parameter_description, parse_complete,
    parse_params, parse_startup, plain_password_challenge, read_password, ready_for_query,
    row_description, server_parameter_message, wrong_password,
};
pub use socket::{read_message, read_message_header, write_all, write_all_flush};
pub use types::{oid, BytesMutReader, FormatCode, Oid, Value};

// Re-export protocol constants
pub use constants::*;

// Constants
pub const MAX_MESSAGE_SIZE: i32 = 256 * 1024 * 1024;
