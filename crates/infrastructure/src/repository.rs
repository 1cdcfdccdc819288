use std::sync::Arc;

use domain::{
    ChatRoom, ChatRoomRepository, Listing, ListingId, ListingRepository, Message, MessageContent,
    MessageId, MessageRepository, NewChatRoom, NewMessage, PushToken, PushTokenStore,
    RepositoryError, RepositoryFuture, RoomId, UserDirectory, UserId, UserProfile,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: i64,
    gig_id: i64,
    buyer_id: i64,
    seller_id: i64,
    is_closed: bool,
    created_at: OffsetDateTime,
}

impl From<RoomRecord> for ChatRoom {
    fn from(value: RoomRecord) -> Self {
        ChatRoom {
            id: RoomId::from(value.id),
            listing_id: ListingId::from(value.gig_id),
            buyer_id: UserId::from(value.buyer_id),
            seller_id: UserId::from(value.seller_id),
            is_closed: value.is_closed,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    room_id: i64,
    sender_id: i64,
    content: String,
    created_at: OffsetDateTime,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            room_id: RoomId::from(value.room_id),
            sender_id: UserId::from(value.sender_id),
            content,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct GigRecord {
    id: i64,
    title: String,
    creator_id: i64,
}

impl From<GigRecord> for Listing {
    fn from(value: GigRecord) -> Self {
        Listing {
            id: ListingId::from(value.id),
            title: value.title,
            owner_id: UserId::from(value.creator_id),
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: i64,
    name: String,
}

#[derive(Clone)]
pub struct PgChatRoomRepository {
    pool: PgPool,
}

impl PgChatRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ROOM_COLUMNS: &str = "id, gig_id, buyer_id, seller_id, is_closed, created_at";

impl ChatRoomRepository for PgChatRoomRepository {
    fn create(&self, room: NewChatRoom) -> RepositoryFuture<ChatRoom> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, RoomRecord>(&format!(
                r#"
                INSERT INTO chat_rooms (gig_id, buyer_id, seller_id, is_closed, created_at)
                VALUES ($1, $2, $3, FALSE, $4)
                RETURNING {ROOM_COLUMNS}
                "#
            ))
            .bind(room.listing_id.value())
            .bind(room.buyer_id.value())
            .bind(room.seller_id.value())
            .bind(room.created_at)
            .fetch_one(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(ChatRoom::from(record))
        })
    }

    fn update(&self, room: ChatRoom) -> RepositoryFuture<ChatRoom> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, RoomRecord>(&format!(
                r#"
                UPDATE chat_rooms
                SET is_closed = $2
                WHERE id = $1
                RETURNING {ROOM_COLUMNS}
                "#
            ))
            .bind(room.id.value())
            .bind(room.is_closed)
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(RepositoryError::NotFound)?;

            Ok(ChatRoom::from(record))
        })
    }

    fn find_by_id(&self, id: RoomId) -> RepositoryFuture<Option<ChatRoom>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, RoomRecord>(&format!(
                "SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE id = $1"
            ))
            .bind(id.value())
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(record.map(ChatRoom::from))
        })
    }

    fn find_by_listing_and_buyer(
        &self,
        listing_id: ListingId,
        buyer_id: UserId,
    ) -> RepositoryFuture<Option<ChatRoom>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, RoomRecord>(&format!(
                "SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE gig_id = $1 AND buyer_id = $2"
            ))
            .bind(listing_id.value())
            .bind(buyer_id.value())
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(record.map(ChatRoom::from))
        })
    }

    fn list_open_for(&self, user_id: UserId) -> RepositoryFuture<Vec<ChatRoom>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let records = sqlx::query_as::<_, RoomRecord>(&format!(
                r#"
                SELECT {ROOM_COLUMNS}
                FROM chat_rooms
                WHERE (buyer_id = $1 OR seller_id = $1) AND NOT is_closed
                ORDER BY id
                "#
            ))
            .bind(user_id.value())
            .fetch_all(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(records.into_iter().map(ChatRoom::from).collect())
        })
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl MessageRepository for PgMessageRepository {
    fn append(&self, message: NewMessage) -> RepositoryFuture<Message> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let mut tx = pool.begin().await.map_err(map_sqlx_err)?;

            // 锁住房间行，同一房间的追加按提交顺序分配 id
            let room: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM chat_rooms WHERE id = $1 FOR UPDATE")
                    .bind(message.room_id.value())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_sqlx_err)?;
            if room.is_none() {
                return Err(RepositoryError::NotFound);
            }

            let record = sqlx::query_as::<_, MessageRecord>(
                r#"
                INSERT INTO messages (room_id, sender_id, content, created_at)
                VALUES ($1, $2, $3, $4)
                RETURNING id, room_id, sender_id, content, created_at
                "#,
            )
            .bind(message.room_id.value())
            .bind(message.sender_id.value())
            .bind(message.content.as_str())
            .bind(message.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            tx.commit().await.map_err(map_sqlx_err)?;
            Message::try_from(record)
        })
    }

    fn page(
        &self,
        room_id: RoomId,
        before: Option<MessageId>,
        limit: u32,
    ) -> RepositoryFuture<Vec<Message>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let records = sqlx::query_as::<_, MessageRecord>(
                r#"
                SELECT id, room_id, sender_id, content, created_at
                FROM messages
                WHERE room_id = $1 AND ($2::BIGINT IS NULL OR id < $2)
                ORDER BY id DESC
                LIMIT $3
                "#,
            )
            .bind(room_id.value())
            .bind(before.map(MessageId::value))
            .bind(i64::from(limit))
            .fetch_all(&pool)
            .await
            .map_err(map_sqlx_err)?;

            records.into_iter().map(Message::try_from).collect()
        })
    }

    fn latest(&self, room_id: RoomId) -> RepositoryFuture<Option<Message>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, MessageRecord>(
                r#"
                SELECT id, room_id, sender_id, content, created_at
                FROM messages
                WHERE room_id = $1
                ORDER BY id DESC
                LIMIT 1
                "#,
            )
            .bind(room_id.value())
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?;

            record.map(Message::try_from).transpose()
        })
    }
}

#[derive(Clone)]
pub struct PgListingRepository {
    pool: PgPool,
}

impl PgListingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ListingRepository for PgListingRepository {
    fn find_by_id(&self, id: ListingId) -> RepositoryFuture<Option<Listing>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, GigRecord>(
                "SELECT id, title, creator_id FROM gigs WHERE id = $1",
            )
            .bind(id.value())
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?;

            Ok(record.map(Listing::from))
        })
    }
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UserDirectory for PgUserDirectory {
    fn find_by_id(&self, id: UserId) -> RepositoryFuture<Option<UserProfile>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, UserRecord>("SELECT id, name FROM users WHERE id = $1")
                .bind(id.value())
                .fetch_optional(&pool)
                .await
                .map_err(map_sqlx_err)?;

            Ok(record.map(|user| UserProfile::new(UserId::from(user.id), user.name)))
        })
    }
}

#[derive(Clone)]
pub struct PgPushTokenStore {
    pool: PgPool,
}

impl PgPushTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PushTokenStore for PgPushTokenStore {
    fn get(&self, user_id: UserId) -> RepositoryFuture<Option<PushToken>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let token: Option<Option<String>> =
                sqlx::query_scalar("SELECT push_token FROM user_profiles WHERE user_id = $1")
                    .bind(user_id.value())
                    .fetch_optional(&pool)
                    .await
                    .map_err(map_sqlx_err)?;

            // 空字符串视为未注册
            Ok(token.flatten().and_then(|value| PushToken::parse(value).ok()))
        })
    }

    fn set(&self, user_id: UserId, token: PushToken) -> RepositoryFuture<()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO user_profiles (user_id, push_token)
                VALUES ($1, $2)
                ON CONFLICT (user_id) DO UPDATE SET push_token = EXCLUDED.push_token
                "#,
            )
            .bind(user_id.value())
            .bind(token.as_str())
            .execute(&pool)
            .await
            .map_err(map_sqlx_err)?;
            Ok(())
        })
    }

    fn clear(&self, token: PushToken) -> RepositoryFuture<u64> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let result = sqlx::query("UPDATE user_profiles SET push_token = NULL WHERE push_token = $1")
                .bind(token.as_str())
                .execute(&pool)
                .await
                .map_err(map_sqlx_err)?;
            Ok(result.rows_affected())
        })
    }
}

pub struct PgStorage {
    pub pool: PgPool,
    pub room_repository: Arc<PgChatRoomRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub listing_repository: Arc<PgListingRepository>,
    pub user_directory: Arc<PgUserDirectory>,
    pub push_tokens: Arc<PgPushTokenStore>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            room_repository: Arc::new(PgChatRoomRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            listing_repository: Arc::new(PgListingRepository::new(pool.clone())),
            user_directory: Arc::new(PgUserDirectory::new(pool.clone())),
            push_tokens: Arc::new(PgPushTokenStore::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
