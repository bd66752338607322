//! Schema initialization. Tables are created idempotently; the
//! UNIQUE(user_id, date) constraints on attendance and face logs are
//! what turns a racing duplicate insert into a constraint error
//! instead of a second row.

use rusqlite::Connection;

pub fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            name      TEXT NOT NULL,
            role      TEXT NOT NULL CHECK (role IN ('student', 'admin')),
            face_data TEXT
        );

        CREATE TABLE IF NOT EXISTS qrcode (
            uuid   TEXT PRIMARY KEY,
            status TEXT NOT NULL CHECK (status IN ('active', 'expired')),
            date   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS leave_requests (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    INTEGER NOT NULL REFERENCES users(id),
            start_date TEXT NOT NULL,
            end_date   TEXT NOT NULL,
            reason     TEXT NOT NULL,
            status     TEXT NOT NULL DEFAULT 'pending'
                       CHECK (status IN ('pending', 'approved', 'rejected'))
        );

        CREATE TABLE IF NOT EXISTS attendance (
            user_id INTEGER NOT NULL REFERENCES users(id),
            date    TEXT NOT NULL,
            status  TEXT NOT NULL CHECK (status IN
                    ('absent', 'pending', 'latePending', 'approved', 'rejected')),
            UNIQUE (user_id, date)
        );

        CREATE TABLE IF NOT EXISTS face_recognition_logs (
            user_id          INTEGER NOT NULL REFERENCES users(id),
            date             TEXT NOT NULL,
            confidence_score REAL NOT NULL,
            status           TEXT NOT NULL DEFAULT 'pending'
                             CHECK (status IN ('pending', 'approved', 'rejected')),
            UNIQUE (user_id, date)
        );

        CREATE INDEX IF NOT EXISTS idx_leave_user_range
            ON leave_requests (user_id, start_date, end_date);
        CREATE INDEX IF NOT EXISTS idx_attendance_status
            ON attendance (status);",
    )
}
