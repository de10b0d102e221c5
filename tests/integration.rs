use serde_json::{json, Value};
use socialgraph::core::kv::MemoryStore;
use socialgraph::notifications::deliver_pending;
use socialgraph::router::route;
use spin_sdk::http::{Method, Request};

/// Drive one request through the router the way the component does,
/// draining queued notifications afterwards.
fn call(store: &MemoryStore, method: Method, path: &str, token: Option<&str>, body: Option<Value>) -> (u16, Value) {
    let mut builder = Request::builder();
    builder.method(method).uri(path);
    if let Some(token) = token {
        builder.header("Authorization", format!("Bearer {}", token));
    }
    if body.is_some() {
        builder.header("Content-Type", "application/json");
    }
    let bytes = body.map(|b| serde_json::to_vec(&b).unwrap()).unwrap_or_default();
    let req = builder.body(bytes).build();

    let resp = route(store, &req);
    deliver_pending(store).unwrap();

    let status = *resp.status();
    let json = if resp.body().is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(resp.body()).unwrap()
    };
    (status, json)
}

/// Register an account and return (id, token).
fn register(store: &MemoryStore, username: &str, is_private: bool) -> (String, String) {
    let (status, body) = call(
        store,
        Method::Post,
        "/api/auth/register",
        None,
        Some(json!({
            "username": username,
            "name": username,
            "email": format!("{}@example.com", username),
            "password": "secret123",
            "isPrivate": is_private,
        })),
    );
    assert_eq!(status, 201, "register {}: {:?}", username, body);
    (
        body["user"]["id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

#[test]
fn test_auth_flow() {
    let store = MemoryStore::new();
    let (id, _) = register(&store, "flow_user", false);

    let (status, body) = call(
        &store,
        Method::Post,
        "/api/auth/register",
        None,
        Some(json!({"username": "other", "name": "x", "email": "flow_user@example.com", "password": "secret123"})),
    );
    assert_eq!(status, 409);
    assert_eq!(body["error"], "Email already exists");

    let (status, _) = call(
        &store,
        Method::Post,
        "/api/auth/login",
        None,
        Some(json!({"email": "flow_user@example.com", "password": "wrong-pass"})),
    );
    assert_eq!(status, 401);

    let (status, body) = call(
        &store,
        Method::Post,
        "/api/auth/login",
        None,
        Some(json!({"email": "FLOW_USER@example.com", "password": "secret123"})),
    );
    assert_eq!(status, 200);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = call(&store, Method::Get, "/api/auth/me", Some(&token), None);
    assert_eq!(status, 200);
    assert_eq!(body["user"]["id"], id.as_str());
    assert!(body["user"].get("password").is_none());

    let (status, _) = call(&store, Method::Post, "/api/auth/logout", Some(&token), None);
    assert_eq!(status, 200);
    let (status, _) = call(&store, Method::Get, "/api/auth/me", Some(&token), None);
    assert_eq!(status, 401);
}

#[test]
fn test_post_like_comment_flow() {
    let store = MemoryStore::new();
    let (author, author_token) = register(&store, "author", false);
    let (_, fan_token) = register(&store, "fan", false);

    let (status, body) = call(
        &store,
        Method::Post,
        "/api/posts",
        Some(&author_token),
        Some(json!({"image": "https://img.example.com/a.jpg", "caption": "<b>Hello</b>", "tags": ["#Rust"]})),
    );
    assert_eq!(status, 201);
    assert_eq!(body["post"]["caption"], "Hello");
    assert_eq!(body["post"]["tags"], json!(["rust"]));
    let post_id = body["post"]["id"].as_str().unwrap().to_string();

    let (status, _) = call(&store, Method::Post, "/api/posts", Some(&author_token), Some(json!({"caption": "no image"})));
    assert_eq!(status, 400);

    let (status, body) = call(&store, Method::Get, "/api/posts", Some(&author_token), None);
    assert_eq!(status, 200);
    assert_eq!(body["posts"][0]["id"], post_id.as_str());
    assert_eq!(body["currentPage"], 1);
    assert_eq!(body["hasNextPage"], false);

    let (status, body) = call(&store, Method::Get, "/api/posts/explore", Some(&fan_token), None);
    assert_eq!(status, 200);
    assert_eq!(body["posts"].as_array().unwrap().len(), 1);

    let (status, body) = call(&store, Method::Post, &format!("/api/posts/{}/like", post_id), Some(&fan_token), None);
    assert_eq!(status, 200);
    assert_eq!(body["liked"], true);
    assert_eq!(body["likeCount"], 1);

    let (status, body) = call(
        &store,
        Method::Post,
        &format!("/api/comments/posts/{}", post_id),
        Some(&fan_token),
        Some(json!({"content": "Great shot"})),
    );
    assert_eq!(status, 201);
    let comment_id = body["comment"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(&store, Method::Get, &format!("/api/comments/posts/{}", post_id), Some(&fan_token), None);
    assert_eq!(status, 200);
    assert_eq!(body["comments"][0]["id"], comment_id.as_str());

    let (status, body) = call(&store, Method::Get, "/api/notifications", Some(&author_token), None);
    assert_eq!(status, 200);
    let kinds: Vec<&str> = body["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["comment", "like"]);
    assert_eq!(body["notifications"][0]["sender"]["username"], "fan");

    let (_, body) = call(&store, Method::Get, "/api/notifications/unread/count", Some(&author_token), None);
    assert_eq!(body["unreadCount"], 2);
    let (status, _) = call(&store, Method::Put, "/api/notifications/read-all", Some(&author_token), None);
    assert_eq!(status, 200);
    let (_, body) = call(&store, Method::Get, "/api/notifications/unread/count", Some(&author_token), None);
    assert_eq!(body["unreadCount"], 0);

    let (status, _) = call(&store, Method::Delete, &format!("/api/posts/{}", post_id), Some(&fan_token), None);
    assert_eq!(status, 403);
    let (status, _) = call(&store, Method::Delete, &format!("/api/posts/{}", post_id), Some(&author_token), None);
    assert_eq!(status, 200);
    let (status, _) = call(&store, Method::Get, &format!("/api/posts/{}", post_id), Some(&author_token), None);
    assert_eq!(status, 404);

    let (status, body) = call(&store, Method::Get, "/api/users/profile/author", None, None);
    assert_eq!(status, 200);
    assert_eq!(body["user"]["postCount"], 0);
    assert_eq!(body["user"]["id"], author.as_str());
}

#[test]
fn test_private_account_follow_and_messaging() {
    let store = MemoryStore::new();
    let (alice, alice_token) = register(&store, "alice", false);
    let (bob, bob_token) = register(&store, "bob", true);

    // Private profile is closed to strangers.
    let (status, _) = call(&store, Method::Get, "/api/users/profile/bob", Some(&alice_token), None);
    assert_eq!(status, 403);

    let (status, body) = call(&store, Method::Post, &format!("/api/users/{}/follow", bob), Some(&alice_token), None);
    assert_eq!(status, 200);
    assert_eq!(body["followRequest"], true);

    // Repeating the request changes nothing.
    let (status, _) = call(&store, Method::Post, &format!("/api/users/{}/follow", bob), Some(&alice_token), None);
    assert_eq!(status, 200);

    let (_, body) = call(&store, Method::Get, "/api/users/follow-requests", Some(&bob_token), None);
    let requests = body["followRequests"].as_array().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["id"], alice.as_str());

    let (_, body) = call(&store, Method::Get, "/api/notifications?type=follow_request", Some(&bob_token), None);
    assert_eq!(body["total"], 1);

    let (status, body) = call(
        &store,
        Method::Post,
        &format!("/api/users/follow-requests/{}", alice),
        Some(&bob_token),
        Some(json!({"action": "maybe"})),
    );
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Invalid action");

    let (status, _) = call(
        &store,
        Method::Post,
        &format!("/api/users/follow-requests/{}", alice),
        Some(&bob_token),
        Some(json!({"action": "accept"})),
    );
    assert_eq!(status, 200);

    // Accepted one-way follow is not enough to chat.
    let (status, body) = call(
        &store,
        Method::Post,
        "/api/messages",
        Some(&alice_token),
        Some(json!({"receiverId": bob, "content": "hi bob"})),
    );
    assert_eq!(status, 403);
    assert_eq!(body["error"], "You can only chat with users who follow you back.");

    let (status, body) = call(&store, Method::Post, &format!("/api/users/{}/follow", alice), Some(&bob_token), None);
    assert_eq!(status, 200);
    assert_eq!(body["following"], true);

    let (status, body) = call(&store, Method::Get, "/api/users/profile/bob", Some(&alice_token), None);
    assert_eq!(status, 200);
    assert_eq!(body["user"]["relation"], "mutual");

    let (status, _) = call(
        &store,
        Method::Post,
        "/api/messages",
        Some(&alice_token),
        Some(json!({"receiverId": bob, "content": "hi bob"})),
    );
    assert_eq!(status, 201);

    let (_, body) = call(&store, Method::Get, "/api/messages/unread/count", Some(&bob_token), None);
    assert_eq!(body["unreadCount"], 1);

    let (status, body) = call(&store, Method::Get, &format!("/api/messages/conversation/{}", alice), Some(&bob_token), None);
    assert_eq!(status, 200);
    assert_eq!(body["messages"][0]["content"], "hi bob");

    let (_, body) = call(&store, Method::Get, "/api/messages/conversations", Some(&bob_token), None);
    assert_eq!(body["conversations"][0]["user"]["id"], alice.as_str());
    assert_eq!(body["conversations"][0]["unreadCount"], 0);

    let (_, body) = call(&store, Method::Get, "/api/notifications", Some(&alice_token), None);
    let kinds: Vec<&str> = body["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["follow", "follow_accept"]);

    // Unfollow severs both directions and closes the channel again.
    let (status, body) = call(&store, Method::Post, &format!("/api/users/{}/follow", bob), Some(&alice_token), None);
    assert_eq!(status, 200);
    assert_eq!(body["following"], false);
    let (status, _) = call(
        &store,
        Method::Post,
        "/api/messages",
        Some(&bob_token),
        Some(json!({"receiverId": alice, "content": "still there?"})),
    );
    assert_eq!(status, 403);
}

#[test]
fn test_page_far_past_the_end_is_empty() {
    let store = MemoryStore::new();
    let (_, token) = register(&store, "pager", false);

    for path in [
        "/api/notifications?page=18446744073709551615",
        "/api/posts?page=18446744073709551615&limit=100",
    ] {
        let (status, body) = call(&store, Method::Get, path, Some(&token), None);
        assert_eq!(status, 200, "{}", path);
        assert_eq!(body["hasNextPage"], false);
    }
}
