pub mod attendance_buttons;
