//! HTML served to plain HTTP clients.

/// Browser chat client served on the WebSocket port when a request does not
/// upgrade. It connects back to the same host and path.
pub const CHAT_PAGE: &str = include_str!("../assets/chat.html");

/// Status page served on the line port to HTTP clients.
pub fn line_info_page(connected: usize, address: &str) -> String {
    let (host, port) = address.rsplit_once(':').unwrap_or((address, ""));
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"UTF-8\">\n\
         <title>parley</title>\n\
         <style>body {{ font-family: system-ui, sans-serif; margin: 1.25rem; }} \
         .info {{ background: #f6f8fa; padding: 1rem; border-radius: 4px; }}</style>\n\
         </head>\n\
         <body>\n\
         <h1>parley</h1>\n\
         <div class=\"info\">\n\
         <p>The line relay is running and accepting connections.</p>\n\
         <p>Connected users: {connected}</p>\n\
         <p>To join, connect with a line-oriented client:</p>\n\
         <code>telnet {host} {port}</code>\n\
         </div>\n\
         </body>\n\
         </html>\n"
    )
}
