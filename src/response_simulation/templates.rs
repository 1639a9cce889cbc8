pub const SSH_BANNER: &[u8] = b"SSH-2.0-OpenSSH_7.9p1\r\n";

const SERVER: &str = "Apache/2.4.41 (Ubuntu)";

const WELCOME_PAGE: &str = "<html><head><title>Welcome</title></head>\
<body><h1>Welcome</h1><p>It works.</p></body></html>";

const BAD_REQUEST_PAGE: &str = "<html><head><title>400 Bad Request</title></head>\
<body><h1>Bad Request</h1>\
<p>Your browser sent a request that this server could not understand.</p></body></html>";

pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn response(
    status: &str,
    content_type: Option<&str>,
    extra: &[(&str, &str)],
    body: &str,
) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {}\r\nServer: {}\r\n", status, SERVER);
    if let Some(ct) = content_type {
        head.push_str(&format!("Content-Type: {}\r\n", ct));
    }
    for (name, value) in extra {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));

    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

pub fn welcome_page() -> Vec<u8> {
    response("200 OK", Some("text/html; charset=utf-8"), &[], WELCOME_PAGE)
}

/// Login form posting back to `action`.
pub fn login_page(action: &str) -> Vec<u8> {
    let body = format!(
        "<html><head><title>Sign in</title></head><body><h1>Sign in</h1>\
<form method=\"post\" action=\"{}\">\
<label>Username <input type=\"text\" name=\"username\"></label>\
<label>Password <input type=\"password\" name=\"password\"></label>\
<button type=\"submit\">Log in</button></form></body></html>",
        html_escape(action)
    );
    response("200 OK", Some("text/html; charset=utf-8"), &[], &body)
}

pub fn redirect_to_login() -> Vec<u8> {
    response("302 Found", None, &[("Location", "/login")], "")
}

pub fn bad_request() -> Vec<u8> {
    response(
        "400 Bad Request",
        Some("text/html; charset=iso-8859-1"),
        &[],
        BAD_REQUEST_PAGE,
    )
}

pub fn too_many_requests() -> Vec<u8> {
    response("429 Too Many Requests", None, &[("Retry-After", "60")], "")
}
